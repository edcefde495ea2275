//! Media track and stream handles
//!
//! A `MediaTrack` is a cheap, clonable handle to one audio or video source.
//! Clones share the enabled flag and the life-cycle state, so the component
//! that acquired a track and the transport it is attached to always agree
//! on whether it is still live.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Life-cycle state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Live,
    /// Stopped by its owner
    Stopped,
    /// Ended by its source, outside the application's control
    Ended,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    state: watch::Sender<TrackState>,
}

#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                state,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute the track without touching its life-cycle
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// Release the underlying device. Idempotent.
    pub fn stop(&self) {
        self.transition(TrackState::Stopped);
    }

    /// Signal that the source ended the track (device unplugged, sharing
    /// stopped from the native picker). Only the capture backend calls this.
    pub fn end(&self) {
        self.transition(TrackState::Ended);
    }

    /// Wait until the track leaves the live state and return how it left.
    pub async fn ended(&self) -> TrackState {
        let mut rx = self.inner.state.subscribe();
        let result = match rx.wait_for(|state| *state != TrackState::Live).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        result
    }

    fn transition(&self, next: TrackState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == TrackState::Live {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            log::debug!("Track {} ({}) -> {:?}", self.inner.id, self.inner.label, next);
        }
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

/// An ordered group of tracks captured or received together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn first_video(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    pub fn first_audio(&self) -> Option<&MediaTrack> {
        self.audio_tracks().next()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let track = MediaTrack::new(TrackKind::Video, "camera");
        let clone = track.clone();

        clone.set_enabled(false);
        assert!(!track.is_enabled());

        track.stop();
        assert_eq!(clone.state(), TrackState::Stopped);
        assert_eq!(track, clone);
    }

    #[test]
    fn test_first_transition_wins() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        track.end();
        track.stop();
        assert_eq!(track.state(), TrackState::Ended);
    }

    #[tokio::test]
    async fn test_ended_reports_external_end() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        let watcher = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };

        tokio::task::yield_now().await;
        track.end();

        assert_eq!(watcher.await.unwrap(), TrackState::Ended);
    }

    #[tokio::test]
    async fn test_ended_returns_immediately_for_stopped_track() {
        let track = MediaTrack::new(TrackKind::Audio, "microphone");
        track.stop();
        assert_eq!(track.ended().await, TrackState::Stopped);
    }

    #[test]
    fn test_stream_helpers() {
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, "camera"),
            MediaTrack::new(TrackKind::Audio, "microphone"),
        ]);
        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.first_audio().map(|t| t.label()), Some("microphone"));
        assert_eq!(stream.live_track_count(), 2);

        stream.stop_all();
        assert_eq!(stream.live_track_count(), 0);
    }
}
