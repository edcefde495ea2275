//! Segment capture contract
//!
//! A capture instance encodes the composite stream into one independently
//! decodable segment. Stopping it delivers the segment's data and then a
//! stopped notification through its `CaptureSink`. The notification fires
//! for every stop, intentional or not.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::media::MediaStream;

#[derive(Debug, Clone)]
pub(crate) enum CaptureEvent {
    Data { segment: u64, bytes: Bytes },
    Stopped { segment: u64 },
}

/// Where a capture instance reports its output
#[derive(Debug, Clone)]
pub struct CaptureSink {
    segment: u64,
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureSink {
    pub(crate) fn new(segment: u64, tx: mpsc::UnboundedSender<CaptureEvent>) -> Self {
        Self { segment, tx }
    }

    /// Sequence number of the segment this sink belongs to
    pub fn segment(&self) -> u64 {
        self.segment
    }

    /// Hand over encoded data. Returns false once the recorder is gone.
    pub fn data(&self, bytes: Bytes) -> bool {
        self.tx
            .send(CaptureEvent::Data {
                segment: self.segment,
                bytes,
            })
            .is_ok()
    }

    pub fn stopped(&self) -> bool {
        self.tx
            .send(CaptureEvent::Stopped {
                segment: self.segment,
            })
            .is_ok()
    }
}

/// One running capture instance
pub trait SegmentCapture: Send {
    /// Stop capturing and flush. Calling it again does nothing.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

#[async_trait]
pub trait SegmentCaptureFactory: Send + Sync {
    async fn start(&self, stream: &MediaStream, sink: CaptureSink) -> Result<Box<dyn SegmentCapture>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_tags_events_with_segment() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = CaptureSink::new(7, tx);
        assert!(sink.data(Bytes::from_static(b"abc")));
        assert!(sink.stopped());

        match rx.try_recv().unwrap() {
            CaptureEvent::Data { segment, bytes } => {
                assert_eq!(segment, 7);
                assert_eq!(bytes.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), CaptureEvent::Stopped { segment: 7 }));
    }

    #[test]
    fn test_sink_reports_closed_recorder() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = CaptureSink::new(0, tx);
        drop(rx);
        assert!(!sink.data(Bytes::from_static(b"late")));
    }
}
