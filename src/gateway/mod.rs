//! Signaling gateway contract
//!
//! The gateway is reached over HTTP by a client that lives outside this
//! crate. Replies mirror the gateway's JSON bodies: a transport-level
//! success can still carry an explicit `error` field, which callers treat
//! as a hard failure.

pub mod keepalive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ClassroomError, Result};
use crate::types::{FeedId, FeedKind, HandleId, RoomId, SessionId};
use crate::webrtc::{SessionDescription, SignalingReply};

pub use keepalive::KeepAlive;

/// Reply to a publish (join + configure) request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReply {
    pub session_id: SessionId,
    pub handle_id: HandleId,
    #[serde(default, rename = "jsep")]
    pub remote_description: Option<SessionDescription>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to a subscribe request: a handle plus the gateway's offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeReply {
    pub session_id: SessionId,
    pub handle_id: HandleId,
    #[serde(default, rename = "jsep")]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Bare acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAck {
    #[serde(default)]
    pub error: Option<String>,
}

impl GatewayAck {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(error) => Err(ClassroomError::Gateway(error)),
            None => Ok(()),
        }
    }
}

impl SignalingReply for PublishReply {
    fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl SignalingReply for GatewayAck {
    fn remote_description(&self) -> Option<&SessionDescription> {
        None
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Client side of the media gateway.
///
/// `Err` means the call itself failed; a reply with `error` set means the
/// gateway answered and refused.
#[async_trait]
pub trait SignalingGateway: Send + Sync {
    async fn publish(
        &self,
        room: &RoomId,
        offer: &SessionDescription,
        kind: FeedKind,
    ) -> Result<PublishReply>;

    async fn subscribe(&self, room: &RoomId, feed: FeedId) -> Result<SubscribeReply>;

    async fn start_subscribe(
        &self,
        session: SessionId,
        handle: HandleId,
        answer: &SessionDescription,
    ) -> Result<GatewayAck>;

    /// Tear down a handle: unpublish a feed or leave a subscription
    async fn unpublish(&self, room: &RoomId, session: SessionId, handle: HandleId) -> Result<GatewayAck>;

    async fn keep_alive(&self, session: SessionId) -> Result<GatewayAck>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_into_result() {
        assert!(GatewayAck::ok().into_result().is_ok());
        let err = GatewayAck::rejected("no such feed").into_result().unwrap_err();
        assert!(matches!(err, ClassroomError::Gateway(ref msg) if msg == "no such feed"));
    }

    #[test]
    fn test_publish_reply_parses_gateway_json() {
        let json = r#"{
            "session_id": 4411,
            "handle_id": 9001,
            "jsep": { "type": "answer", "sdp": "v=0" }
        }"#;
        let reply: PublishReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.session_id, SessionId(4411));
        assert_eq!(
            reply.remote_description,
            Some(SessionDescription::answer("v=0"))
        );
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_error_field_is_reported() {
        let json = r#"{ "session_id": 1, "handle_id": 2, "error": "room full" }"#;
        let reply: PublishReply = serde_json::from_str(json).unwrap();
        assert_eq!(SignalingReply::error(&reply), Some("room full"));
    }
}
