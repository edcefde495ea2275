//! Audio mixing graph
//!
//! Several audio sources (microphone, system audio) are routed into one
//! graph that produces a single mixed output track. The graph owns that
//! output track and stops it when closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::track::{MediaTrack, TrackKind};
use crate::errors::MediaError;

pub trait AudioMixer: Send + Sync {
    /// Route an audio source into the mix
    fn connect(&self, source: &MediaTrack) -> Result<(), MediaError>;

    /// The single mixed output track
    fn output_track(&self) -> MediaTrack;

    /// Tear the graph down and release the output track. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait AudioMixerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioMixer>, MediaError>;
}

/// Routing bookkeeping for a mixing graph.
///
/// Sample processing belongs to the platform backend; this records which
/// sources feed the destination and owns the destination track.
pub struct MixingGraph {
    sources: Mutex<Vec<MediaTrack>>,
    destination: MediaTrack,
    closed: AtomicBool,
}

impl MixingGraph {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            destination: MediaTrack::new(TrackKind::Audio, "mixed-audio"),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources
            .lock()
            .map(|sources| sources.len())
            .unwrap_or_default()
    }
}

impl Default for MixingGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioMixer for MixingGraph {
    fn connect(&self, source: &MediaTrack) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Unavailable("mixing graph is closed".to_string()));
        }
        if source.kind() != TrackKind::Audio {
            return Err(MediaError::Unavailable(format!(
                "cannot mix non-audio track {}",
                source.label()
            )));
        }

        let mut sources = self
            .sources
            .lock()
            .map_err(|_| MediaError::Unavailable("mixing graph lock poisoned".to_string()))?;
        log::debug!("Routing {} into mixing graph", source.label());
        sources.push(source.clone());
        Ok(())
    }

    fn output_track(&self) -> MediaTrack {
        self.destination.clone()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.destination.stop();
        if let Ok(mut sources) = self.sources.lock() {
            sources.clear();
        }
        log::debug!("Mixing graph closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Creates a fresh `MixingGraph` for every recording
#[derive(Debug, Clone, Copy, Default)]
pub struct MixingGraphFactory;

impl AudioMixerFactory for MixingGraphFactory {
    fn create(&self) -> Result<Box<dyn AudioMixer>, MediaError> {
        Ok(Box::new(MixingGraph::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_audio_sources() {
        let graph = MixingGraph::new();
        graph
            .connect(&MediaTrack::new(TrackKind::Audio, "microphone"))
            .unwrap();
        graph
            .connect(&MediaTrack::new(TrackKind::Audio, "system-audio"))
            .unwrap();
        assert_eq!(graph.source_count(), 2);
        assert!(graph.output_track().is_live());
    }

    #[test]
    fn test_rejects_video_source() {
        let graph = MixingGraph::new();
        let result = graph.connect(&MediaTrack::new(TrackKind::Video, "screen"));
        assert!(result.is_err());
    }

    #[test]
    fn test_close_releases_output_track() {
        let graph = MixingGraph::new();
        let output = graph.output_track();

        graph.close();
        graph.close();

        assert!(graph.is_closed());
        assert!(!output.is_live());
        assert!(graph
            .connect(&MediaTrack::new(TrackKind::Audio, "microphone"))
            .is_err());
    }
}
