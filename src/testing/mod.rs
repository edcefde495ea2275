//! Testing utilities for classroom media
//!
//! In-memory stand-ins for every collaborator the crate talks to: media
//! devices, peer transports, the signaling gateway, the chunk service and
//! the segment encoder. Each fake is scriptable and records what it was
//! asked to do, so tests can assert on call order as well as outcomes.

pub mod capture;
pub mod chunks;
pub mod devices;
pub mod gateway;
pub mod transport;

pub use capture::{FakeCapture, FakeCaptureFactory};
pub use chunks::{CompletionCall, FakeChunkService, UploadBehavior, UploadCall};
pub use devices::FakeDevices;
pub use gateway::{FakeGateway, GatewayCall};
pub use transport::{FakeTransport, FakeTransportFactory, GatherMode};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::ClassroomConfig;
use crate::media::MixingGraphFactory;
use crate::publish::{MediaPublisher, ScreenPublisher};
use crate::recording::ChunkRecorder;
use crate::subscribe::FeedSubscriber;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One set of fakes shared by every component built from it
#[derive(Clone)]
pub struct TestRig {
    pub devices: Arc<FakeDevices>,
    pub transports: Arc<FakeTransportFactory>,
    pub gateway: Arc<FakeGateway>,
    pub chunks: Arc<FakeChunkService>,
    pub captures: Arc<FakeCaptureFactory>,
    pub config: ClassroomConfig,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(FakeDevices::new()),
            transports: Arc::new(FakeTransportFactory::new()),
            gateway: Arc::new(FakeGateway::new()),
            chunks: Arc::new(FakeChunkService::new()),
            captures: Arc::new(FakeCaptureFactory::new()),
            config: ClassroomConfig::default(),
        }
    }

    pub fn media_publisher(&self) -> MediaPublisher {
        MediaPublisher::new(
            self.devices.clone(),
            self.gateway.clone(),
            self.transports.clone(),
            self.config.clone(),
        )
    }

    pub fn screen_publisher(&self) -> ScreenPublisher {
        ScreenPublisher::new(
            self.devices.clone(),
            self.gateway.clone(),
            self.transports.clone(),
            self.config.clone(),
        )
    }

    pub fn subscriber(&self) -> FeedSubscriber {
        FeedSubscriber::new(self.gateway.clone(), self.transports.clone(), self.config.clone())
    }

    pub fn recorder(&self) -> ChunkRecorder {
        ChunkRecorder::new(
            self.devices.clone(),
            Arc::new(MixingGraphFactory),
            self.captures.clone(),
            self.chunks.clone(),
            self.config.recording.clone(),
        )
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
///
/// Works under paused time: each sleep lets the clock auto-advance.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let step = Duration::from_millis(10);
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(step).await;
    }
    Ok(())
}
