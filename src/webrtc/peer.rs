use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::errors::Result;
use crate::media::{MediaStream, MediaTrack};

/// Peer transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTCConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

/// Public reflection servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

impl Default for RTCConfiguration {
    fn default() -> Self {
        Self::with_stun_servers(DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()))
    }
}

impl RTCConfiguration {
    /// Configuration with one credential-less ICE server per URL
    pub fn with_stun_servers(urls: impl IntoIterator<Item = String>) -> Self {
        Self {
            ice_servers: urls
                .into_iter()
                .map(|url| IceServer {
                    urls: vec![url],
                    username: None,
                    credential: None,
                })
                .collect(),
            ice_transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    Relay,
    All,
}

/// Bundle policy for RTC connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

/// Peer transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE candidate gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sdp.trim().is_empty()
    }

    /// Number of `a=candidate` lines embedded in the description
    pub fn candidate_count(&self) -> usize {
        self.sdp
            .lines()
            .filter(|line| line.starts_with("a=candidate"))
            .count()
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// One local peer transport endpoint.
///
/// Implementations wrap a platform peer connection. Whoever created the
/// transport is responsible for calling `close`, on the error path too.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Attach a local track for sending
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Current local description, including candidates gathered so far
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn gathering_state(&self) -> IceGatheringState;

    /// Resolves once candidate gathering is complete. May never resolve.
    async fn gathering_complete(&self);

    /// The first inbound media stream, once one arrives
    fn remote_stream(&self) -> watch::Receiver<Option<MediaStream>>;

    async fn connection_state(&self) -> ConnectionState;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, config: &RTCConfiguration) -> Result<Arc<dyn PeerTransport>>;
}
