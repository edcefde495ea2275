//! Chunk upload worker
//!
//! Every chunk handed to the queue is uploaded right away in its own task,
//! so a slow or hanging upload never holds back the chunks behind it. Each
//! upload is attempted once under its own timeout: a failure or timeout
//! drops the chunk and leaves `chunk_index` where it was.

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::service::ChunkService;
use super::state::RecordingSession;
use crate::types::RoomId;

#[derive(Debug)]
pub(crate) struct UploadJob {
    pub bytes: Bytes,
    pub duration_seconds: u64,
}

/// Producer side of the upload queue
#[derive(Debug, Clone)]
pub(crate) struct UploadQueue {
    tx: mpsc::UnboundedSender<UploadJob>,
}

impl UploadQueue {
    pub fn enqueue(&self, job: UploadJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

pub(crate) struct UploadWorker {
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub(crate) struct UploadContext {
    pub room: RoomId,
    pub service: Arc<dyn ChunkService>,
    pub state: Arc<Mutex<RecordingSession>>,
    pub min_chunk_bytes: usize,
    pub timeout: Duration,
}

impl UploadWorker {
    /// Start the worker. It runs until every clone of the returned queue
    /// is dropped and every upload in flight has settled.
    pub fn spawn(ctx: UploadContext) -> (Self, UploadQueue) {
        let (tx, mut rx) = mpsc::unbounded_channel::<UploadJob>();
        let handle = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    job = rx.recv() => match job {
                        Some(job) => {
                            let ctx = ctx.clone();
                            in_flight.spawn(async move { upload_chunk(&ctx, job).await });
                        }
                        None => break,
                    },
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_join(joined);
                    }
                }
            }

            // Each upload is bounded by its own timeout
            while let Some(joined) = in_flight.join_next().await {
                log_join(joined);
            }
            log::debug!("Uploads for room {} settled", ctx.room);
        });
        (Self { handle }, UploadQueue { tx })
    }

    /// Wait until every queued chunk has been attempted. Returns once all
    /// queue clones are gone and the last upload has settled.
    pub async fn drain(&mut self) {
        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                log::error!("Upload worker failed: {}", e);
            }
        }
    }

    /// Stop the worker; uploads still in flight are cancelled with it
    pub fn abort(&self) {
        self.handle.abort();
    }
}

fn log_join(joined: Result<bool, JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            log::error!("Chunk upload task failed: {}", e);
        }
    }
}

/// Attempt one upload and account for it. Never retries.
pub(crate) async fn upload_chunk(ctx: &UploadContext, job: UploadJob) -> bool {
    let size = job.bytes.len();
    if size < ctx.min_chunk_bytes {
        log::debug!("Skipping {} byte chunk below the {} byte minimum", size, ctx.min_chunk_bytes);
        return false;
    }

    let index = lock_state(&ctx.state).chunk_index;
    log::debug!("Uploading chunk {} ({} bytes) for room {}", index, size, ctx.room);

    let upload = ctx
        .service
        .upload_chunk(&ctx.room, job.bytes, index, job.duration_seconds);
    match tokio::time::timeout(ctx.timeout, upload).await {
        Ok(Ok(reply)) => {
            let mut state = lock_state(&ctx.state);
            state.record_upload_success(reply.total_chunks_uploaded);
            log::info!(
                "Chunk {} uploaded, server holds {} chunks",
                index,
                reply.total_chunks_uploaded
            );
            true
        }
        Ok(Err(e)) => {
            log::warn!("Chunk {} upload failed, dropping {} bytes: {}", index, size, e);
            false
        }
        Err(_) => {
            log::warn!(
                "Chunk {} upload timed out after {:?}, dropping {} bytes",
                index,
                ctx.timeout,
                size
            );
            false
        }
    }
}

pub(crate) fn lock_state(state: &Mutex<RecordingSession>) -> std::sync::MutexGuard<'_, RecordingSession> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::state::RecordingOptions;
    use crate::testing::{FakeChunkService, UploadBehavior};

    fn context(service: Arc<FakeChunkService>) -> UploadContext {
        let mut session = RecordingSession::new();
        session.begin(RoomId::from("room"), RecordingOptions::default());
        UploadContext {
            room: RoomId::from("room"),
            service,
            state: Arc::new(Mutex::new(session)),
            min_chunk_bytes: 1000,
            timeout: Duration::from_secs(60),
        }
    }

    fn job(size: usize) -> UploadJob {
        UploadJob {
            bytes: Bytes::from(vec![0u8; size]),
            duration_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_small_chunk_never_uploaded() {
        let service = Arc::new(FakeChunkService::new());
        let ctx = context(service.clone());

        assert!(!upload_chunk(&ctx, job(999)).await);
        assert!(service.uploads().is_empty());
        assert_eq!(lock_state(&ctx.state).chunk_index, 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_index() {
        let service = Arc::new(FakeChunkService::new());
        service.script([UploadBehavior::Fail, UploadBehavior::Accept]);
        let ctx = context(service.clone());

        assert!(!upload_chunk(&ctx, job(2000)).await);
        assert_eq!(lock_state(&ctx.state).chunk_index, 0);

        assert!(upload_chunk(&ctx, job(2000)).await);
        let uploads = service.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].chunk_index, 0);
        assert_eq!(uploads[1].chunk_index, 0);
        assert_eq!(lock_state(&ctx.state).chunk_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_upload_times_out() {
        let service = Arc::new(FakeChunkService::new());
        service.script([UploadBehavior::Hang]);
        let ctx = context(service.clone());

        let started = tokio::time::Instant::now();
        assert!(!upload_chunk(&ctx, job(2000)).await);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(lock_state(&ctx.state).chunk_index, 0);
    }

    #[tokio::test]
    async fn test_worker_attempts_every_queued_chunk() {
        let service = Arc::new(FakeChunkService::new());
        let ctx = context(service.clone());
        let (mut worker, queue) = UploadWorker::spawn(ctx.clone());

        for size in [1500, 10, 3000] {
            queue.enqueue(job(size));
        }
        drop(queue);
        worker.drain().await;

        let mut sizes: Vec<usize> = service.uploads().iter().map(|u| u.size).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1500, 3000]);
        assert_eq!(lock_state(&ctx.state).chunk_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_upload_does_not_hold_back_next_chunk() {
        let service = Arc::new(FakeChunkService::new());
        service.script([UploadBehavior::Hang, UploadBehavior::Accept]);
        let ctx = context(service.clone());
        let (mut worker, queue) = UploadWorker::spawn(ctx.clone());
        let started = tokio::time::Instant::now();

        queue.enqueue(job(2000));
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(job(2000));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(service.uploads().len(), 2);
        assert_eq!(lock_state(&ctx.state).chunk_index, 1);

        drop(queue);
        worker.drain().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited < Duration::from_secs(61));
        assert_eq!(lock_state(&ctx.state).chunk_index, 1);
    }
}
