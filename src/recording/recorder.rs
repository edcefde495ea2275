//! Chunked screen recording with pipelined uploads
//!
//! The recorder composes screen video with a mix of system and microphone
//! audio, and restarts a short-lived capture instance at every chunk
//! boundary so each chunk decodes on its own. A driver task owns the
//! capture instance and reacts to rotation ticks, capture events and the
//! final flush request. Each finished chunk is handed to the upload worker,
//! which uploads it in its own task while the next chunk is being captured.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::capture::{CaptureEvent, CaptureSink, SegmentCapture, SegmentCaptureFactory};
use super::service::ChunkService;
use super::state::{
    CapturePhase, PhaseEvent, RecordingOptions, RecordingSession, RecordingSnapshot,
    RecordingSummary,
};
use super::uploader::{lock_state, UploadContext, UploadJob, UploadQueue, UploadWorker};
use crate::config::RecorderConfig;
use crate::errors::{ClassroomError, MediaError, Result};
use crate::media::{
    AudioMixer, AudioMixerFactory, DisplayConstraints, MediaConstraints, MediaDevices, MediaStream,
    MediaTrack, TrackState,
};
use crate::types::RoomId;

/// Device streams and the mixing graph owned by one recording
#[derive(Default)]
struct CaptureResources {
    display: Option<MediaStream>,
    microphone: Option<MediaStream>,
    mixer: Option<Box<dyn AudioMixer>>,
}

impl CaptureResources {
    /// Stop every acquired track and close the mixer. Safe to call twice.
    fn release(&mut self) {
        if let Some(display) = self.display.take() {
            display.stop_all();
        }
        if let Some(microphone) = self.microphone.take() {
            microphone.stop_all();
        }
        if let Some(mixer) = self.mixer.take() {
            mixer.close();
        }
    }
}

enum DriverCommand {
    Rotate,
    Flush(oneshot::Sender<()>),
}

/// Everything a running recording owns. Dropping it stops all tasks and
/// releases all devices.
struct ActiveRecording {
    room: RoomId,
    commands: mpsc::UnboundedSender<DriverCommand>,
    driver: JoinHandle<()>,
    rotation: JoinHandle<()>,
    ticker: JoinHandle<()>,
    source_watch: JoinHandle<()>,
    uploads: UploadWorker,
    resources: CaptureResources,
}

impl ActiveRecording {
    fn timers_running(&self) -> usize {
        [&self.rotation, &self.ticker]
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        self.rotation.abort();
        self.ticker.abort();
        self.driver.abort();
        self.source_watch.abort();
        self.uploads.abort();
        self.resources.release();
    }
}

/// What `prepare` hands back once every fallible setup step succeeded
struct Prepared {
    stream: MediaStream,
    video: MediaTrack,
    capture: Box<dyn SegmentCapture>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    events_rx: mpsc::UnboundedReceiver<CaptureEvent>,
}

pub struct ChunkRecorder {
    devices: Arc<dyn MediaDevices>,
    mixers: Arc<dyn AudioMixerFactory>,
    captures: Arc<dyn SegmentCaptureFactory>,
    service: Arc<dyn ChunkService>,
    config: RecorderConfig,
    state: Arc<Mutex<RecordingSession>>,
    active: Mutex<Option<ActiveRecording>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ChunkRecorder {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        mixers: Arc<dyn AudioMixerFactory>,
        captures: Arc<dyn SegmentCaptureFactory>,
        service: Arc<dyn ChunkService>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            devices,
            mixers,
            captures,
            service,
            config,
            state: Arc::new(Mutex::new(RecordingSession::new())),
            active: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Start recording `room`. Any failure releases whatever was acquired
    /// before the error is returned.
    pub async fn start(&self, room: &RoomId, options: RecordingOptions) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let busy = lock_state(&self.state).is_active();
        if busy {
            return Err(ClassroomError::AlreadyActive(
                "a recording is already in progress".to_string(),
            ));
        }

        log::info!("Starting recording in room {} ({:?})", room, options);
        let mut resources = CaptureResources::default();
        let prepared = match self.prepare(options, &mut resources).await {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("Failed to start recording in room {}: {}", room, e);
                resources.release();
                lock_state(&self.state).reset();
                return Err(e);
            }
        };

        let mut active = lock_active(&self.active);
        lock_state(&self.state).begin(room.clone(), options);

        let (uploads, queue) = UploadWorker::spawn(UploadContext {
            room: room.clone(),
            service: Arc::clone(&self.service),
            state: Arc::clone(&self.state),
            min_chunk_bytes: self.config.min_chunk_bytes,
            timeout: self.config.upload_timeout(),
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            state: Arc::clone(&self.state),
            captures: Arc::clone(&self.captures),
            stream: prepared.stream,
            events_tx: prepared.events_tx,
            uploads: queue,
            capture: Some(prepared.capture),
            segment: 0,
            segment_started: Instant::now(),
            min_chunk_bytes: self.config.min_chunk_bytes,
            flush_waiter: None,
        };
        let driver = tokio::spawn(driver.run(commands_rx, prepared.events_rx));
        let rotation = spawn_rotation(self.config.chunk_duration(), commands_tx.clone());
        let ticker = spawn_ticker(Arc::clone(&self.state));
        let source_watch = watch_source(prepared.video);

        *active = Some(ActiveRecording {
            room: room.clone(),
            commands: commands_tx,
            driver,
            rotation,
            ticker,
            source_watch,
            uploads,
            resources,
        });
        log::info!("Recording started in room {}", room);
        Ok(())
    }

    async fn prepare(
        &self,
        options: RecordingOptions,
        resources: &mut CaptureResources,
    ) -> Result<Prepared> {
        let display = self
            .devices
            .get_display_media(&DisplayConstraints {
                system_audio: options.system_audio,
            })
            .await?;
        resources.display = Some(display.clone());

        let mut audio_sources: Vec<MediaTrack> = display.audio_tracks().cloned().collect();
        if options.microphone {
            let microphone = self
                .devices
                .get_user_media(&MediaConstraints::microphone_only())
                .await?;
            audio_sources.extend(microphone.audio_tracks().cloned());
            resources.microphone = Some(microphone);
        }

        let video = display
            .first_video()
            .cloned()
            .ok_or_else(|| MediaError::NotFound("screen video".to_string()))?;

        let mixer = self.mixers.create()?;
        let mixed = mixer.output_track();
        let mixer = resources.mixer.insert(mixer);
        for source in &audio_sources {
            mixer.connect(source)?;
        }
        log::debug!("Mixing {} audio sources into one track", audio_sources.len());

        let stream = MediaStream::new(vec![video.clone(), mixed]);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let capture = self
            .captures
            .start(&stream, CaptureSink::new(0, events_tx.clone()))
            .await?;

        Ok(Prepared {
            stream,
            video,
            capture,
            events_tx,
            events_rx,
        })
    }

    /// Stop recording and report it complete.
    ///
    /// Returns `Ok(None)` when nothing was recording or another stop is
    /// already completing. Devices, timers and state are released even when
    /// the completion call fails.
    pub async fn stop(&self) -> Result<Option<RecordingSummary>> {
        // 1. Flip the flags; a concurrent stop sees is_completing and bails
        let claimed = lock_state(&self.state).begin_stop();
        if !claimed {
            log::debug!("Stop ignored, no recording to stop");
            return Ok(None);
        }

        let taken = lock_active(&self.active).take();
        let mut active = match taken {
            Some(active) => active,
            None => {
                lock_state(&self.state).reset();
                return Ok(None);
            }
        };
        log::info!("Stopping recording in room {}", active.room);

        let result = self.finish(&mut active).await;

        // 7. Release devices, the mixer and every task, then forget the session
        drop(active);
        lock_state(&self.state).reset();

        match &result {
            Ok(summary) => log::info!(
                "Recording complete: {} chunks, {}s",
                summary.total_chunks,
                summary.total_duration_seconds
            ),
            Err(e) => log::error!("Recording stopped but completion failed: {}", e),
        }
        result.map(Some)
    }

    async fn finish(&self, active: &mut ActiveRecording) -> Result<RecordingSummary> {
        // 2. No more chunk boundaries
        active.rotation.abort();

        // 3.
        tokio::time::sleep(self.config.stop_grace()).await;

        // 4. Flush the final segment
        let (done_tx, done_rx) = oneshot::channel();
        if active.commands.send(DriverCommand::Flush(done_tx)).is_ok() {
            match tokio::time::timeout(self.config.final_flush_timeout(), done_rx).await {
                Ok(Ok(())) => log::debug!("Final segment flushed"),
                Ok(Err(_)) => log::warn!("Capture driver exited before the final flush"),
                Err(_) => log::warn!(
                    "Final segment not flushed within {:?}",
                    self.config.final_flush_timeout()
                ),
            }
        }
        active.driver.abort();
        if let Err(e) = (&mut active.driver).await {
            if !e.is_cancelled() {
                log::error!("Capture driver failed: {}", e);
            }
        }

        // 5. Every queued chunk gets its one attempt, bounded by one upload timeout
        active.uploads.drain().await;

        // 6.
        let (total_chunks, elapsed) = {
            let state = lock_state(&self.state);
            (state.chunk_index, state.elapsed_seconds)
        };
        self.complete(&active.room, total_chunks, elapsed).await
    }

    async fn complete(&self, room: &RoomId, total_chunks: u32, elapsed: u64) -> Result<RecordingSummary> {
        log::info!(
            "Completing recording for room {}: {} chunks, {}s",
            room,
            total_chunks,
            elapsed
        );
        let call = self.service.complete_recording(room, total_chunks, elapsed);
        match tokio::time::timeout(self.config.upload_timeout(), call).await {
            Ok(Ok(reply)) if reply.ok => Ok(RecordingSummary {
                total_chunks,
                total_duration_seconds: elapsed,
            }),
            Ok(Ok(reply)) => Err(ClassroomError::Completion(
                reply
                    .error
                    .unwrap_or_else(|| "completion rejected".to_string()),
            )),
            Ok(Err(e)) => Err(ClassroomError::Completion(e.to_string())),
            Err(_) => Err(ClassroomError::Completion(format!(
                "completion timed out after {:?}",
                self.config.upload_timeout()
            ))),
        }
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        lock_state(&self.state).snapshot()
    }

    pub fn is_recording(&self) -> bool {
        lock_state(&self.state).is_recording
    }

    /// Rotation timer and duration ticker still running
    pub fn active_timers(&self) -> usize {
        lock_active(&self.active)
            .as_ref()
            .map(ActiveRecording::timers_running)
            .unwrap_or(0)
    }
}

fn lock_active(active: &Mutex<Option<ActiveRecording>>) -> MutexGuard<'_, Option<ActiveRecording>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_rotation(period: Duration, commands: mpsc::UnboundedSender<DriverCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if commands.send(DriverCommand::Rotate).is_err() {
                break;
            }
        }
    })
}

/// Whole seconds of wall clock, independent of chunk boundaries
fn spawn_ticker(state: Arc<Mutex<RecordingSession>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let second = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + second, second);
        loop {
            ticker.tick().await;
            lock_state(&state).elapsed_seconds += 1;
        }
    })
}

fn watch_source(video: MediaTrack) -> JoinHandle<()> {
    tokio::spawn(async move {
        if video.ended().await == TrackState::Ended {
            log::warn!("Screen video ended outside the application, recording continues without it");
        }
    })
}

/// Owns the capture instance for the life of a recording
struct Driver {
    state: Arc<Mutex<RecordingSession>>,
    captures: Arc<dyn SegmentCaptureFactory>,
    stream: MediaStream,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    uploads: UploadQueue,
    capture: Option<Box<dyn SegmentCapture>>,
    segment: u64,
    segment_started: Instant,
    min_chunk_bytes: usize,
    flush_waiter: Option<oneshot::Sender<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<DriverCommand>,
        mut events: mpsc::UnboundedReceiver<CaptureEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => {
                    if self.on_capture_event(event).await {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(DriverCommand::Rotate) => self.rotate().await,
                    Some(DriverCommand::Flush(done)) => {
                        if self.flush(done) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        log::debug!("Capture driver exiting after segment {}", self.segment);
    }

    /// Returns true once the final segment has stopped
    async fn on_capture_event(&mut self, event: CaptureEvent) -> bool {
        match event {
            CaptureEvent::Data { segment, bytes } => {
                if bytes.len() < self.min_chunk_bytes {
                    log::debug!(
                        "Discarding {} bytes from segment {}, below the {} byte minimum",
                        bytes.len(),
                        segment,
                        self.min_chunk_bytes
                    );
                    return false;
                }
                let duration_seconds = self.segment_started.elapsed().as_secs_f64().round() as u64;
                if !self.uploads.enqueue(UploadJob {
                    bytes,
                    duration_seconds,
                }) {
                    log::warn!("Upload worker gone, dropping segment {}", segment);
                }
                false
            }
            CaptureEvent::Stopped { segment } => {
                if segment != self.segment {
                    log::debug!("Ignoring stop of stale segment {}", segment);
                    return false;
                }
                self.capture = None;

                let (previous, restart) = {
                    let mut state = lock_state(&self.state);
                    let previous = state.phase;
                    state.apply(PhaseEvent::Stopped);
                    (previous, state.should_restart_capture())
                };

                match previous {
                    CapturePhase::StoppingForShutdown => {
                        if let Some(done) = self.flush_waiter.take() {
                            let _ = done.send(());
                        }
                        return true;
                    }
                    CapturePhase::StoppingForRotation if restart => self.start_segment().await,
                    CapturePhase::Capturing if restart => {
                        log::warn!("Capture segment {} stopped on its own, restarting", segment);
                        self.start_segment().await;
                    }
                    _ => log::debug!("Segment {} stopped, no restart", segment),
                }
                false
            }
        }
    }

    async fn rotate(&mut self) {
        let (phase, live) = {
            let state = lock_state(&self.state);
            (state.phase, state.should_restart_capture())
        };
        if !live {
            return;
        }

        match phase {
            CapturePhase::Capturing => {
                lock_state(&self.state).apply(PhaseEvent::Rotate);
                log::debug!("Rotating capture at end of segment {}", self.segment);
                if let Some(capture) = self.capture.as_mut() {
                    capture.stop();
                }
            }
            CapturePhase::Idle => {
                log::info!("No capture running at chunk boundary, starting one");
                self.start_segment().await;
            }
            other => log::debug!("Rotation skipped in phase {:?}", other),
        }
    }

    /// Returns true when there is nothing left to flush
    fn flush(&mut self, done: oneshot::Sender<()>) -> bool {
        let phase = lock_state(&self.state).phase;
        match phase {
            CapturePhase::Capturing | CapturePhase::StoppingForRotation => {
                lock_state(&self.state).apply(PhaseEvent::Shutdown);
                self.flush_waiter = Some(done);
                if let Some(capture) = self.capture.as_mut() {
                    capture.stop();
                }
                false
            }
            CapturePhase::StoppingForShutdown => {
                self.flush_waiter = Some(done);
                false
            }
            CapturePhase::Idle => {
                let _ = done.send(());
                true
            }
        }
    }

    async fn start_segment(&mut self) {
        let segment = self.segment + 1;
        let sink = CaptureSink::new(segment, self.events_tx.clone());
        match self.captures.start(&self.stream, sink).await {
            Ok(capture) => {
                self.segment = segment;
                self.capture = Some(capture);
                self.segment_started = Instant::now();
                lock_state(&self.state).apply(PhaseEvent::Started);
                log::debug!("Capture segment {} started", segment);
            }
            Err(e) => {
                // Retried at the next chunk boundary
                log::error!("Failed to start capture segment {}: {}", segment, e);
            }
        }
    }
}
