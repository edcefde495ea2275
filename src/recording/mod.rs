//! Chunked recording module
//!
//! Records the shared screen plus mixed system and microphone audio as a
//! series of independently decodable chunks, uploaded while recording
//! continues.
//!
//! # Example
//! ```rust,ignore
//! use classroom_media::recording::{ChunkRecorder, RecordingOptions};
//!
//! let recorder = ChunkRecorder::new(devices, mixers, captures, service, config.recording);
//! recorder.start(&room, RecordingOptions::default()).await?;
//!
//! // Later:
//! if let Some(summary) = recorder.stop().await? {
//!     println!("{} chunks, {}s", summary.total_chunks, summary.total_duration_seconds);
//! }
//! ```

pub mod capture;
mod recorder;
pub mod service;
pub mod state;
mod uploader;

pub use capture::{CaptureSink, SegmentCapture, SegmentCaptureFactory};
pub use recorder::ChunkRecorder;
pub use service::{ChunkService, CompletionReply, UploadReply};
pub use state::{
    CapturePhase, PhaseEvent, RecordingOptions, RecordingSession, RecordingSnapshot,
    RecordingSummary,
};
