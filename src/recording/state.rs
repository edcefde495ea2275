//! Recording state management
//!
//! Defines the capture state machine and the shared session record that
//! the rotation driver, the upload worker and the duration ticker all
//! read and mutate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RoomId;

/// Life cycle of the current capture instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    /// No capture instance running
    Idle,
    /// A capture instance is producing the current segment
    Capturing,
    /// Stopped at a chunk boundary; a new instance follows
    StoppingForRotation,
    /// Stopped for good; no new instance follows
    StoppingForShutdown,
}

impl Default for CapturePhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Inputs to the capture state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Started,
    Rotate,
    Shutdown,
    /// The capture instance reported that it stopped
    Stopped,
}

impl CapturePhase {
    /// Next phase for `event`, or `None` when the transition is not allowed
    pub fn next(self, event: PhaseEvent) -> Option<CapturePhase> {
        use CapturePhase::*;
        match (self, event) {
            (Idle, PhaseEvent::Started) => Some(Capturing),
            (Capturing, PhaseEvent::Rotate) => Some(StoppingForRotation),
            (Capturing, PhaseEvent::Shutdown) => Some(StoppingForShutdown),
            (StoppingForRotation, PhaseEvent::Shutdown) => Some(StoppingForShutdown),
            (Capturing, PhaseEvent::Stopped)
            | (StoppingForRotation, PhaseEvent::Stopped)
            | (StoppingForShutdown, PhaseEvent::Stopped) => Some(Idle),
            _ => None,
        }
    }
}

/// Which audio sources are mixed into the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingOptions {
    /// Ask the display capture for system audio
    pub system_audio: bool,
    /// Capture the microphone; a missing microphone fails `start`
    pub microphone: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            system_audio: true,
            microphone: true,
        }
    }
}

/// Shared state of one recording.
///
/// `chunk_index` is the index the next upload is sent with. It advances
/// only on a confirmed upload, so a lost chunk leaves no gap in the
/// numbering the server sees.
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    pub room_id: Option<RoomId>,
    pub options: RecordingOptions,
    pub chunk_index: u32,
    pub uploaded_chunks: u32,
    pub elapsed_seconds: u64,
    pub is_recording: bool,
    pub is_stopping: bool,
    pub is_completing: bool,
    pub phase: CapturePhase,
    pub started_at: Option<DateTime<Utc>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session live for `room`, with the first capture running
    pub fn begin(&mut self, room: RoomId, options: RecordingOptions) {
        *self = Self {
            room_id: Some(room),
            options,
            is_recording: true,
            phase: CapturePhase::Capturing,
            started_at: Some(Utc::now()),
            ..Self::default()
        };
    }

    /// Apply a phase event; returns false and leaves the phase untouched
    /// when the transition is not allowed
    pub fn apply(&mut self, event: PhaseEvent) -> bool {
        match self.phase.next(event) {
            Some(next) => {
                log::trace!("Capture phase {:?} -> {:?} on {:?}", self.phase, next, event);
                self.phase = next;
                true
            }
            None => {
                log::debug!("Ignoring {:?} in capture phase {:?}", event, self.phase);
                false
            }
        }
    }

    /// Account for a chunk the server accepted
    pub fn record_upload_success(&mut self, server_total: u32) {
        self.chunk_index += 1;
        // Replies to concurrent uploads may arrive out of order
        self.uploaded_chunks = self.uploaded_chunks.max(server_total);
    }

    /// Read from live state every time a capture instance stops
    pub fn should_restart_capture(&self) -> bool {
        self.is_recording && !self.is_stopping
    }

    /// Switch to the stopping half of the life cycle. Returns false when
    /// there is nothing to stop or another stop already owns completion.
    pub fn begin_stop(&mut self) -> bool {
        if !self.is_recording || self.is_completing {
            return false;
        }
        self.is_completing = true;
        self.is_stopping = true;
        self.is_recording = false;
        true
    }

    pub fn is_active(&self) -> bool {
        self.is_recording || self.is_stopping || self.is_completing
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        RecordingSnapshot {
            room_id: self.room_id.clone(),
            chunk_index: self.chunk_index,
            uploaded_chunks: self.uploaded_chunks,
            elapsed_seconds: self.elapsed_seconds,
            is_recording: self.is_recording,
            is_stopping: self.is_stopping,
            is_completing: self.is_completing,
            phase: self.phase,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of the recording state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSnapshot {
    pub room_id: Option<RoomId>,
    pub chunk_index: u32,
    pub uploaded_chunks: u32,
    pub elapsed_seconds: u64,
    pub is_recording: bool,
    pub is_stopping: bool,
    pub is_completing: bool,
    pub phase: CapturePhase,
    pub started_at: Option<DateTime<Utc>>,
}

/// Result of a completed recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub total_chunks: u32,
    pub total_duration_seconds: u64,
}
