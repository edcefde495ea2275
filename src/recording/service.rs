//! Chunk upload service contract

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::RoomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReply {
    /// Chunks the server holds for this recording, this one included
    pub total_chunks_uploaded: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Server side of a chunked recording. Callers bound every call with a
/// timeout.
#[async_trait]
pub trait ChunkService: Send + Sync {
    async fn upload_chunk(
        &self,
        room: &RoomId,
        chunk: Bytes,
        chunk_index: u32,
        duration_seconds: u64,
    ) -> Result<UploadReply>;

    async fn complete_recording(
        &self,
        room: &RoomId,
        total_chunks: u32,
        total_duration_seconds: u64,
    ) -> Result<CompletionReply>;
}
