/// Peer transport abstraction and its value types
pub mod peer;
/// Offer/answer exchange with bounded ICE gathering
pub mod negotiation;
#[cfg(feature = "webrtc")]
pub mod rtc;

pub use negotiation::{
    wait_for_gathering, GatheringOutcome, LocalRole, NegotiationOutcome, NegotiationSession,
    SignalingReply,
};
pub use peer::{
    ConnectionState, IceCandidate, IceGatheringState, IceServer, PeerTransport, RTCConfiguration,
    SdpType, SessionDescription, TransportFactory,
};
