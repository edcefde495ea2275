//! Fake chunk upload service

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::lock;
use crate::errors::{ClassroomError, Result};
use crate::recording::{ChunkService, CompletionReply, UploadReply};
use crate::types::RoomId;

/// Scripted outcome of one upload call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBehavior {
    Accept,
    /// Fail immediately, as a rejected request or a network error would
    Fail,
    /// Never answer; only the caller's timeout ends the call
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub room: RoomId,
    pub chunk_index: u32,
    pub size: usize,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCall {
    pub room: RoomId,
    pub total_chunks: u32,
    pub total_duration_seconds: u64,
}

#[derive(Default)]
struct ServiceState {
    script: VecDeque<UploadBehavior>,
    uploads: Vec<UploadCall>,
    accepted: u32,
    completions: Vec<CompletionCall>,
    completion_error: Option<String>,
}

/// Accepts every upload unless scripted otherwise
#[derive(Default)]
pub struct FakeChunkService {
    state: Mutex<ServiceState>,
}

impl FakeChunkService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next upload calls, in order
    pub fn script(&self, behaviors: impl IntoIterator<Item = UploadBehavior>) {
        lock(&self.state).script.extend(behaviors);
    }

    /// Completion replies report failure with `reason`
    pub fn fail_completion(&self, reason: &str) {
        lock(&self.state).completion_error = Some(reason.to_string());
    }

    /// Every upload attempt, failed ones included
    pub fn uploads(&self) -> Vec<UploadCall> {
        lock(&self.state).uploads.clone()
    }

    pub fn accepted(&self) -> u32 {
        lock(&self.state).accepted
    }

    pub fn completions(&self) -> Vec<CompletionCall> {
        lock(&self.state).completions.clone()
    }
}

#[async_trait]
impl ChunkService for FakeChunkService {
    async fn upload_chunk(
        &self,
        room: &RoomId,
        chunk: Bytes,
        chunk_index: u32,
        duration_seconds: u64,
    ) -> Result<UploadReply> {
        let behavior = {
            let mut state = lock(&self.state);
            state.uploads.push(UploadCall {
                room: room.clone(),
                chunk_index,
                size: chunk.len(),
                duration_seconds,
            });
            let behavior = state.script.pop_front().unwrap_or(UploadBehavior::Accept);
            if behavior == UploadBehavior::Accept {
                state.accepted += 1;
            }
            (behavior, state.accepted)
        };

        match behavior {
            (UploadBehavior::Accept, total) => Ok(UploadReply {
                total_chunks_uploaded: total,
            }),
            (UploadBehavior::Fail, _) => Err(ClassroomError::Upload(format!(
                "chunk {} rejected",
                chunk_index
            ))),
            (UploadBehavior::Hang, _) => {
                std::future::pending::<()>().await;
                Err(ClassroomError::Upload("unreachable".to_string()))
            }
        }
    }

    async fn complete_recording(
        &self,
        room: &RoomId,
        total_chunks: u32,
        total_duration_seconds: u64,
    ) -> Result<CompletionReply> {
        let mut state = lock(&self.state);
        state.completions.push(CompletionCall {
            room: room.clone(),
            total_chunks,
            total_duration_seconds,
        });
        Ok(CompletionReply {
            ok: state.completion_error.is_none(),
            error: state.completion_error.clone(),
        })
    }
}
