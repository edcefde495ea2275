//! Publishing local media to the gateway
//!
//! Camera+microphone and screen are independent publications: each
//! publisher holds at most one live `PeerSession`, and re-publishing to the
//! same room is a no-op.

pub mod camera;
mod core;
pub mod screen;
pub mod session;

pub use camera::MediaPublisher;
pub use screen::ScreenPublisher;
pub use session::{PeerSession, PeerSessionInfo};
