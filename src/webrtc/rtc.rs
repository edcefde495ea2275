//! `PeerTransport` backed by webrtc-rs
//!
//! Local tracks are announced as send-only transceivers; media samples
//! are fed by the platform capture backend, which is outside this crate.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::MediaEngine;
use ::webrtc::api::APIBuilder;
use ::webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::peer_connection::configuration::RTCConfiguration as WebrtcConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use ::webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use ::webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use ::webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use ::webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use ::webrtc::track::track_remote::TrackRemote;

use super::peer::{
    BundlePolicy, ConnectionState, IceGatheringState, IceServer, IceTransportPolicy, PeerTransport,
    RTCConfiguration, SdpType, SessionDescription, TransportFactory,
};
use crate::errors::{ClassroomError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Offer | RTCSdpType::Unspecified => SdpType::Offer,
        }
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = ClassroomError;

    fn try_from(desc: SessionDescription) -> Result<Self> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(ClassroomError::Negotiation(
                    "Rollback SDP type not supported".to_string(),
                ))
            }
        };
        parsed.map_err(|e| ClassroomError::Negotiation(format!("Invalid SDP: {}", e)))
    }
}

fn negotiation_error(context: &str, error: impl std::fmt::Display) -> ClassroomError {
    ClassroomError::Negotiation(format!("{}: {}", context, error))
}

pub struct RtcPeerTransport {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    gathering: watch::Receiver<IceGatheringState>,
    remote_stream: watch::Receiver<Option<MediaStream>>,
}

impl RtcPeerTransport {
    pub async fn new(config: &RTCConfiguration) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| negotiation_error("Failed to register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| negotiation_error("Failed to register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = WebrtcConfiguration {
            ice_servers: config.ice_servers.iter().cloned().map(Into::into).collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
            },
            bundle_policy: match config.bundle_policy {
                BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
                BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
                BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            },
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| negotiation_error("Failed to create peer connection", e))?,
        );
        let id = uuid::Uuid::new_v4().to_string();

        let (gathering_tx, gathering) = watch::channel(IceGatheringState::New);
        peer_connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let next = match state {
                RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
                RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
                _ => None,
            };
            if let Some(next) = next {
                gathering_tx.send_replace(next);
            }
            Box::pin(async {})
        }));

        let (remote_tx, remote_stream) = watch::channel(None);
        let peer_id = id.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                log::info!("Inbound {:?} track on transport {}", kind, peer_id);
                remote_tx.send_modify(|stream| match stream {
                    Some(stream) => stream.add_track(MediaTrack::new(kind, "remote")),
                    None => *stream = Some(MediaStream::new(vec![MediaTrack::new(kind, "remote")])),
                });
                Box::pin(async {})
            },
        ));

        Ok(Self {
            id,
            peer_connection,
            gathering,
            remote_stream,
        })
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let kind = match track.kind() {
            TrackKind::Audio => RTPCodecType::Audio,
            TrackKind::Video => RTPCodecType::Video,
        };
        let init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Sendonly,
            send_encodings: vec![],
        };
        self.peer_connection
            .add_transceiver_from_kind(kind, Some(init))
            .await
            .map_err(|e| negotiation_error("Failed to add transceiver", e))?;
        log::debug!("Added {} transceiver for track {}", track.label(), track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| negotiation_error("Failed to create offer", e))?;
        Ok(offer.into())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| negotiation_error("Failed to create answer", e))?;
        Ok(answer.into())
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let rtc_desc = RTCSessionDescription::try_from(desc)?;
        self.peer_connection
            .set_local_description(rtc_desc)
            .await
            .map_err(|e| negotiation_error("Failed to set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let rtc_desc = RTCSessionDescription::try_from(desc)?;
        self.peer_connection
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| negotiation_error("Failed to set remote description", e))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .map(SessionDescription::from)
    }

    async fn gathering_state(&self) -> IceGatheringState {
        *self.gathering.borrow()
    }

    async fn gathering_complete(&self) {
        let mut rx = self.gathering.clone();
        if rx.wait_for(|state| *state == IceGatheringState::Complete).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn remote_stream(&self) -> watch::Receiver<Option<MediaStream>> {
        self.remote_stream.clone()
    }

    async fn connection_state(&self) -> ConnectionState {
        self.peer_connection.connection_state().into()
    }

    async fn close(&self) -> Result<()> {
        log::info!("Closing peer connection {}", self.id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| negotiation_error("Failed to close peer connection", e))
    }
}

/// Creates a webrtc-rs peer connection per negotiation
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcTransportFactory;

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, config: &RTCConfiguration) -> Result<Arc<dyn PeerTransport>> {
        Ok(Arc::new(RtcPeerTransport::new(config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_contains_transceivers() {
        let transport = RtcPeerTransport::new(&RTCConfiguration::default()).await.unwrap();
        transport
            .add_track(&MediaTrack::new(TrackKind::Video, "camera"))
            .await
            .unwrap();

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=video"));

        transport.close().await.unwrap();
        assert_eq!(transport.connection_state().await, ConnectionState::Closed);
    }
}
