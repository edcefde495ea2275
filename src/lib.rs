//! classroom-media: session negotiation and chunked recording for live classrooms
//!
//! This crate is the client-side media core of a live classroom. It talks to
//! a media gateway through the `SignalingGateway` trait and to the platform
//! through `MediaDevices` and `PeerTransport`, and provides:
//!
//! # Features
//! - Camera+microphone publishing with idempotent publish and in-place toggles
//! - Screen sharing that unpublishes itself when the user stops sharing natively
//! - Feed subscriptions with a caller-side retry helper
//! - Chunked screen recording with pipelined, at-most-once uploads
//! - Bounded ICE gathering on every negotiation
//!
//! # Usage
//! ```rust,ignore
//! use classroom_media::{ClassroomConfig, MediaPublisher, RoomId};
//!
//! let config = ClassroomConfig::load_or_default();
//! let publisher = MediaPublisher::new(devices, gateway, transports, config);
//! let session = publisher.publish(&RoomId::from("physics-101")).await?;
//! publisher.toggle_microphone().await?;
//! publisher.unpublish(&session.room_id).await?;
//! ```
//!
//! Enable the `webrtc` feature for a `PeerTransport` built on webrtc-rs.
pub mod config;
pub mod errors;
pub mod gateway;
pub mod media;
pub mod publish;
pub mod recording;
pub mod subscribe;
pub mod types;
pub mod webrtc;

// In-memory collaborators for tests and the simulator
pub mod testing;

// Re-exports for convenience
pub use config::ClassroomConfig;
pub use errors::{ClassroomError, MediaError, Result};
pub use gateway::{KeepAlive, SignalingGateway};
pub use media::{MediaDevices, MediaStream, MediaTrack, TrackKind, TrackState};
pub use publish::{MediaPublisher, PeerSession, PeerSessionInfo, ScreenPublisher};
pub use recording::{ChunkRecorder, ChunkService, RecordingOptions, RecordingSnapshot, RecordingSummary};
pub use subscribe::{subscribe_with_retry, FeedSubscriber, RetryPolicy, Subscription};
pub use types::{Direction, FeedId, FeedKind, HandleId, RoomId, SessionId};
pub use webrtc::{NegotiationSession, PeerTransport, SessionDescription, TransportFactory};

/// Initialize logging for the media core
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "classroom_media=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        webrtc_backend: cfg!(feature = "webrtc"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the webrtc-rs transport is compiled in
    pub webrtc_backend: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "classroom-media");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.webrtc_backend, cfg!(feature = "webrtc"));
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
