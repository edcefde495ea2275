//! Session-description exchange shared by every publish and subscribe flow
//!
//! A `NegotiationSession` drives one peer transport through:
//!
//! 1. creating the local description (offer, or answer to a remote offer)
//! 2. waiting for ICE gathering, bounded by a per-direction timeout
//! 3. handing the local description to the signaling side
//! 4. applying the remote description the signaling side returns
//!
//! Retry policy and transport teardown belong to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::peer::{PeerTransport, SessionDescription};
use crate::errors::{ClassroomError, Result};

/// A signaling reply that may carry a remote description or a rejection
pub trait SignalingReply {
    fn remote_description(&self) -> Option<&SessionDescription>;

    /// Explicit error field set by the gateway
    fn error(&self) -> Option<&str>;
}

/// Which local description the session produces
#[derive(Debug, Clone)]
pub enum LocalRole {
    /// Create an offer and apply the returned answer
    Offer,
    /// Apply the given remote offer and create an answer
    Answer(SessionDescription),
}

/// How the ICE gathering race settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringOutcome {
    Complete,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct NegotiationOutcome<R> {
    pub local_description: SessionDescription,
    pub applied_remote: Option<SessionDescription>,
    pub gathering: GatheringOutcome,
    pub reply: R,
}

pub struct NegotiationSession {
    transport: Arc<dyn PeerTransport>,
    gather_timeout: Duration,
}

impl NegotiationSession {
    pub fn new(transport: Arc<dyn PeerTransport>, gather_timeout: Duration) -> Self {
        Self {
            transport,
            gather_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// Run the exchange. `exchange` receives the local description and
    /// returns the signaling reply for it.
    pub async fn negotiate<F, Fut, R>(&self, role: LocalRole, exchange: F) -> Result<NegotiationOutcome<R>>
    where
        F: FnOnce(SessionDescription) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: SignalingReply + Send,
    {
        let transport = &self.transport;
        let creates_offer = matches!(role, LocalRole::Offer);

        let created = match role {
            LocalRole::Offer => {
                let offer = transport.create_offer().await?;
                transport.set_local_description(offer.clone()).await?;
                offer
            }
            LocalRole::Answer(remote_offer) => {
                transport.set_remote_description(remote_offer).await?;
                let answer = transport.create_answer().await?;
                transport.set_local_description(answer.clone()).await?;
                answer
            }
        };

        let gathering = wait_for_gathering(transport.as_ref(), self.gather_timeout).await;

        // Whatever candidates exist by now go out with the description
        let local_description = match transport.local_description().await {
            Some(desc) if !desc.is_empty() => desc,
            _ => created,
        };
        log::debug!(
            "Transport {} sending {:?} with {} candidates",
            transport.id(),
            local_description.sdp_type,
            local_description.candidate_count()
        );

        let reply = exchange(local_description.clone()).await?;
        if let Some(error) = reply.error() {
            log::error!("Gateway rejected negotiation for transport {}: {}", transport.id(), error);
            return Err(ClassroomError::Gateway(error.to_string()));
        }

        let applied_remote = match reply.remote_description() {
            Some(remote) if creates_offer => {
                transport.set_remote_description(remote.clone()).await?;
                Some(remote.clone())
            }
            Some(_) => {
                log::debug!("Ignoring remote description in reply to an answer");
                None
            }
            None => None,
        };

        Ok(NegotiationOutcome {
            local_description,
            applied_remote,
            gathering,
            reply,
        })
    }
}

/// Race ICE gathering completion against `timeout`; the first to settle wins.
pub async fn wait_for_gathering(transport: &dyn PeerTransport, timeout: Duration) -> GatheringOutcome {
    tokio::select! {
        _ = transport.gathering_complete() => GatheringOutcome::Complete,
        _ = tokio::time::sleep(timeout) => {
            log::warn!(
                "ICE gathering on transport {} still incomplete after {:?}, continuing with partial candidates",
                transport.id(),
                timeout
            );
            GatheringOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayAck, PublishReply};
    use crate::testing::{FakeTransportFactory, GatherMode};
    use crate::types::{HandleId, SessionId};
    use crate::webrtc::peer::{RTCConfiguration, SdpType, TransportFactory};

    fn answer_reply(error: Option<&str>) -> PublishReply {
        PublishReply {
            session_id: SessionId(1),
            handle_id: HandleId(2),
            remote_description: Some(SessionDescription::answer("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n")),
            error: error.map(str::to_string),
        }
    }

    async fn transport(mode: GatherMode) -> Arc<dyn PeerTransport> {
        let factory = FakeTransportFactory::new();
        factory.set_gathering(mode);
        factory.create(&RTCConfiguration::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_offer_applies_answer() {
        let session = NegotiationSession::new(transport(GatherMode::Complete).await, Duration::from_secs(10));
        let outcome = session
            .negotiate(LocalRole::Offer, |offer| async move {
                assert_eq!(offer.sdp_type, SdpType::Offer);
                assert_eq!(offer.candidate_count(), 1);
                Ok(answer_reply(None))
            })
            .await
            .unwrap();

        assert_eq!(outcome.gathering, GatheringOutcome::Complete);
        assert_eq!(outcome.applied_remote.map(|d| d.sdp_type), Some(SdpType::Answer));
        assert_eq!(outcome.reply.handle_id, HandleId(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_gathering_bounded_by_timeout() {
        let session = NegotiationSession::new(transport(GatherMode::Never).await, Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        let outcome = session
            .negotiate(LocalRole::Offer, |_| async { Ok(answer_reply(None)) })
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_secs(11));
        assert_eq!(outcome.gathering, GatheringOutcome::TimedOut);
        assert!(!outcome.local_description.is_empty());
        assert_eq!(outcome.local_description.candidate_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathering_before_timeout_wins() {
        let session = NegotiationSession::new(
            transport(GatherMode::After(Duration::from_secs(2))).await,
            Duration::from_secs(5),
        );
        let started = tokio::time::Instant::now();

        let outcome = session
            .negotiate(LocalRole::Offer, |_| async { Ok(answer_reply(None)) })
            .await
            .unwrap();

        assert_eq!(outcome.gathering, GatheringOutcome::Complete);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reply_error_is_gateway_failure() {
        let session = NegotiationSession::new(transport(GatherMode::Complete).await, Duration::from_secs(10));
        let err = session
            .negotiate(LocalRole::Offer, |_| async { Ok(answer_reply(Some("room is full"))) })
            .await
            .unwrap_err();

        assert!(matches!(err, ClassroomError::Gateway(ref msg) if msg == "room is full"));
    }

    #[tokio::test]
    async fn test_answer_role() {
        let transport = transport(GatherMode::Complete).await;
        let session = NegotiationSession::new(Arc::clone(&transport), Duration::from_secs(5));
        let remote_offer = SessionDescription::offer("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n");

        let outcome = session
            .negotiate(LocalRole::Answer(remote_offer), |answer| async move {
                assert_eq!(answer.sdp_type, SdpType::Answer);
                Ok(GatewayAck::ok())
            })
            .await
            .unwrap();

        assert_eq!(outcome.local_description.sdp_type, SdpType::Answer);
        assert!(outcome.applied_remote.is_none());
        assert!(transport.remote_stream().borrow().is_some());
    }
}
