//! Fake capture devices

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::lock;
use crate::errors::MediaError;
use crate::media::{
    DisplayConstraints, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind,
};

/// Hands out fresh tracks on every request and remembers all of them
#[derive(Default)]
pub struct FakeDevices {
    deny_camera: AtomicBool,
    missing_microphone: AtomicBool,
    deny_display: AtomicBool,
    issued: Mutex<Vec<MediaTrack>>,
    display_video: Mutex<Option<MediaTrack>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_camera(&self) {
        self.deny_camera.store(true, Ordering::SeqCst);
    }

    pub fn remove_microphone(&self) {
        self.missing_microphone.store(true, Ordering::SeqCst);
    }

    pub fn deny_display(&self) {
        self.deny_display.store(true, Ordering::SeqCst);
    }

    /// Every track handed out so far
    pub fn issued_tracks(&self) -> Vec<MediaTrack> {
        lock(&self.issued).clone()
    }

    /// Issued tracks that nobody has stopped yet
    pub fn live_tracks(&self) -> usize {
        lock(&self.issued).iter().filter(|t| t.is_live()).count()
    }

    /// Video track of the most recent display capture
    pub fn display_video(&self) -> Option<MediaTrack> {
        lock(&self.display_video).clone()
    }

    /// Simulate the user pressing the platform's "stop sharing" button
    pub fn end_display_capture(&self) {
        if let Some(track) = self.display_video() {
            track.end();
        }
    }

    fn issue(&self, kind: TrackKind, label: &str) -> MediaTrack {
        let track = MediaTrack::new(kind, label);
        lock(&self.issued).push(track.clone());
        track
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video && self.deny_camera.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("camera".to_string()));
        }
        if constraints.audio && self.missing_microphone.load(Ordering::SeqCst) {
            return Err(MediaError::NotFound("microphone".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(self.issue(TrackKind::Video, "fake-camera"));
        }
        if constraints.audio {
            tracks.push(self.issue(TrackKind::Audio, "fake-microphone"));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn get_display_media(
        &self,
        constraints: &DisplayConstraints,
    ) -> Result<MediaStream, MediaError> {
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("screen".to_string()));
        }

        let video = self.issue(TrackKind::Video, "fake-screen");
        *lock(&self.display_video) = Some(video.clone());
        let mut tracks = vec![video];
        if constraints.system_audio {
            tracks.push(self.issue(TrackKind::Audio, "fake-system-audio"));
        }
        Ok(MediaStream::new(tracks))
    }
}
