//! Fake segment encoder

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::lock;
use crate::errors::{ClassroomError, Result};
use crate::media::MediaStream;
use crate::recording::{CaptureSink, SegmentCapture, SegmentCaptureFactory};

/// Segment size used when no size was scripted
pub const DEFAULT_SEGMENT_BYTES: usize = 4096;

/// A capture instance that produces one payload when stopped
pub struct FakeCapture {
    sink: CaptureSink,
    size: usize,
    active: Arc<AtomicBool>,
}

impl FakeCapture {
    fn finish(sink: &CaptureSink, size: usize, active: &AtomicBool) {
        if !active.swap(false, Ordering::SeqCst) {
            return;
        }
        if size > 0 {
            sink.data(Bytes::from(vec![0u8; size]));
        }
        sink.stopped();
    }
}

impl SegmentCapture for FakeCapture {
    fn stop(&mut self) {
        Self::finish(&self.sink, self.size, &self.active);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct Running {
    sink: CaptureSink,
    size: usize,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct FakeCaptureFactory {
    sizes: Mutex<VecDeque<usize>>,
    failures_left: AtomicU32,
    started: AtomicU32,
    running: Mutex<Vec<Running>>,
    last_stream: Mutex<Option<MediaStream>>,
}

impl FakeCaptureFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload sizes for the next segments, in order
    pub fn segment_sizes(&self, sizes: impl IntoIterator<Item = usize>) {
        lock(&self.sizes).extend(sizes);
    }

    /// The next `count` starts fail
    pub fn fail_next_starts(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.running)
            .iter()
            .filter(|r| r.active.load(Ordering::SeqCst))
            .count()
    }

    pub fn last_stream(&self) -> Option<MediaStream> {
        lock(&self.last_stream).clone()
    }

    /// Stop every running capture from outside, as an encoder crash would
    pub fn interrupt_active(&self) {
        for running in lock(&self.running).iter() {
            FakeCapture::finish(&running.sink, running.size, &running.active);
        }
    }
}

#[async_trait]
impl SegmentCaptureFactory for FakeCaptureFactory {
    async fn start(&self, stream: &MediaStream, sink: CaptureSink) -> Result<Box<dyn SegmentCapture>> {
        let failures = self.failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(ClassroomError::Acquisition(
                crate::errors::MediaError::Unavailable("encoder busy".to_string()),
            ));
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_stream) = Some(stream.clone());
        let size = lock(&self.sizes).pop_front().unwrap_or(DEFAULT_SEGMENT_BYTES);
        let active = Arc::new(AtomicBool::new(true));

        let mut running = lock(&self.running);
        running.retain(|r| r.active.load(Ordering::SeqCst));
        running.push(Running {
            sink: sink.clone(),
            size,
            active: Arc::clone(&active),
        });

        Ok(Box::new(FakeCapture { sink, size, active }))
    }
}
