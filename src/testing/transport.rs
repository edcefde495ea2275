//! Fake peer transports

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::lock;
use crate::errors::{ClassroomError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::webrtc::{
    ConnectionState, IceGatheringState, PeerTransport, RTCConfiguration, SdpType,
    SessionDescription, TransportFactory,
};

const HOST_CANDIDATE: &str = "a=candidate:1 1 udp 2122260223 192.168.1.20 54400 typ host\r\n";

/// How candidate gathering behaves on a fake transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherMode {
    Complete,
    /// Gathering never finishes; only the timeout ends the wait
    Never,
    After(Duration),
}

pub struct FakeTransport {
    id: String,
    gather_mode: GatherMode,
    fail_negotiation: bool,
    config: RTCConfiguration,
    tracks: Mutex<Vec<MediaTrack>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    gathering: watch::Sender<IceGatheringState>,
    remote_stream: watch::Sender<Option<MediaStream>>,
    closed: AtomicBool,
}

impl FakeTransport {
    fn new(id: String, gather_mode: GatherMode, fail_negotiation: bool, config: RTCConfiguration) -> Self {
        let (gathering, _) = watch::channel(IceGatheringState::New);
        let (remote_stream, _) = watch::channel(None);
        Self {
            id,
            gather_mode,
            fail_negotiation,
            config,
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            gathering,
            remote_stream,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attached_tracks(&self) -> Vec<MediaTrack> {
        lock(&self.tracks).clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    pub fn configuration(&self) -> &RTCConfiguration {
        &self.config
    }

    fn describe(&self, sdp_type: SdpType) -> SessionDescription {
        let mut sdp = format!("v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n", self.id);
        let tracks = lock(&self.tracks);
        let has_video = tracks.is_empty() || tracks.iter().any(|t| t.kind() == TrackKind::Video);
        let has_audio = tracks.is_empty() || tracks.iter().any(|t| t.kind() == TrackKind::Audio);
        if has_video {
            sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
        }
        if has_audio {
            sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
        }
        SessionDescription { sdp_type, sdp }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClassroomError::Negotiation(format!("transport {} is closed", self.id)));
        }
        if self.fail_negotiation {
            return Err(ClassroomError::Negotiation(format!(
                "transport {} refused to negotiate",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        lock(&self.tracks).push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if lock(&self.remote).is_none() {
            return Err(ClassroomError::Negotiation("no remote offer to answer".to_string()));
        }
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        *lock(&self.local) = Some(desc);
        self.gathering.send_replace(IceGatheringState::Gathering);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let is_offer = desc.sdp_type == SdpType::Offer;
        *lock(&self.remote) = Some(desc);
        if is_offer {
            self.remote_stream.send_replace(Some(MediaStream::new(vec![
                MediaTrack::new(TrackKind::Video, "remote-video"),
                MediaTrack::new(TrackKind::Audio, "remote-audio"),
            ])));
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let mut desc = lock(&self.local).clone()?;
        if *self.gathering.borrow() == IceGatheringState::Complete {
            desc.sdp.push_str(HOST_CANDIDATE);
        }
        Some(desc)
    }

    async fn gathering_state(&self) -> IceGatheringState {
        *self.gathering.borrow()
    }

    async fn gathering_complete(&self) {
        match self.gather_mode {
            GatherMode::Complete => {}
            GatherMode::Never => std::future::pending::<()>().await,
            GatherMode::After(delay) => tokio::time::sleep(delay).await,
        }
        self.gathering.send_replace(IceGatheringState::Complete);
    }

    fn remote_stream(&self) -> watch::Receiver<Option<MediaStream>> {
        self.remote_stream.subscribe()
    }

    async fn connection_state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else if lock(&self.remote).is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::New
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let remote = self.remote_stream.borrow().clone();
        if let Some(stream) = remote {
            stream.stop_all();
        }
        Ok(())
    }
}

/// Builds `FakeTransport`s and keeps every one it built
pub struct FakeTransportFactory {
    next_id: AtomicU64,
    gather_mode: Mutex<GatherMode>,
    fail_create: AtomicBool,
    fail_negotiation: AtomicBool,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl Default for FakeTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            gather_mode: Mutex::new(GatherMode::Complete),
            fail_create: AtomicBool::new(false),
            fail_negotiation: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_gathering(&self, mode: GatherMode) {
        *lock(&self.gather_mode) = mode;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_negotiation(&self, fail: bool) {
        self.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        lock(&self.created).last().cloned()
    }

    /// Transports created and not yet closed
    pub fn open_count(&self) -> usize {
        lock(&self.created).iter().filter(|t| !t.is_closed()).count()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(&self, config: &RTCConfiguration) -> Result<Arc<dyn PeerTransport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ClassroomError::Negotiation("transport creation failed".to_string()));
        }
        let id = format!("fake-pc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let transport = Arc::new(FakeTransport::new(
            id,
            *lock(&self.gather_mode),
            self.fail_negotiation.load(Ordering::SeqCst),
            config.clone(),
        ));
        lock(&self.created).push(Arc::clone(&transport));
        Ok(transport)
    }
}
