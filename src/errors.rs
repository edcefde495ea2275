use thiserror::Error;

/// Failure to acquire a capture device (camera, microphone or display)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied for {0}")]
    PermissionDenied(String),
    #[error("no {0} device found")]
    NotFound(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum ClassroomError {
    /// Camera, microphone or screen could not be acquired
    #[error("Media acquisition error: {0}")]
    Acquisition(#[from] MediaError),
    /// Missing or rejected session description, or a transport failure
    #[error("Negotiation error: {0}")]
    Negotiation(String),
    /// The gateway rejected the request, or could not be reached
    #[error("Gateway error: {0}")]
    Gateway(String),
    /// A chunk upload failed or timed out. Never fatal to a recording.
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("Already active: {0}")]
    AlreadyActive(String),
    #[error("Not published: {0}")]
    NotPublished(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// The recording completion call failed after all chunks were handled
    #[error("Completion error: {0}")]
    Completion(String),
}

impl ClassroomError {
    /// Whether the failed operation was rolled back entirely.
    ///
    /// Upload errors only reduce the number of recorded chunks, every
    /// other kind aborts the operation that raised it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ClassroomError::Upload(_))
    }
}

pub type Result<T> = std::result::Result<T, ClassroomError>;
