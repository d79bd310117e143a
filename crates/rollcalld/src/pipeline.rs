//! Attendance pipeline coordinator.
//!
//! One dedicated thread owns the capture device and every piece of session
//! state (throttle, cooldowns, unknown clusters, present-set) and runs
//! capture → throttle → match → debounce → dedup → ledger for each frame.
//! Other tasks talk to it only through [`PipelineHandle`]: commands go in over
//! an mpsc channel, and the thread publishes a whole new
//! [`PipelineSnapshot`] on a watch channel after every change.

use crate::config::Config;
use chrono::{DateTime, Local};
use rollcall_core::{
    AttendanceLedger, BoundingBox, CooldownKey, CooldownTracker, Decision, FaceEmbedder,
    FrameThrottle, Gallery, IdentityId, IdentityMeta, LedgerError, Matcher, NearestMatcher,
    UnknownDeduplicator,
};
use rollcall_hw::{CameraError, CaptureBackend, CaptureSource, Frame};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};

const UNKNOWN_LABEL: &str = "UNKNOWN";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("cannot {command} while {state}")]
    InvalidTransition {
        command: Command,
        state: PipelineState,
    },
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("pipeline thread exited")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No capture device held.
    #[default]
    Idle,
    /// Opening the device and discarding warmup frames.
    Initializing,
    Running,
    /// Capturing and deciding, but not publishing.
    Paused,
    /// Device released and session cleared; immediately followed by `Idle`.
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Initializing => "initializing",
            PipelineState::Running => "running",
            PipelineState::Paused => "paused",
            PipelineState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    /// Full reset: release the device and clear the session.
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Known,
    Unknown,
}

/// Box and label drawn over one detected face.
#[derive(Debug, Clone, Serialize)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub kind: OverlayKind,
}

/// The latest frame with the most recent detection overlays.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub overlays: Vec<Overlay>,
    /// Whether detection ran on this frame, or it is passthrough with reused overlays.
    pub detected: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub gallery_size: usize,
    /// Distinct identities accepted this session.
    pub identified: usize,
    /// Distinct unknown clusters this session.
    pub unknown: usize,
}

/// An identity seen this session, with its roster details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendee {
    pub name: String,
    #[serde(flatten)]
    pub meta: IdentityMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub unknown: usize,
    pub attendees: Vec<Attendee>,
}

/// Everything a consumer may observe, replaced as a unit on every publish.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub frame: Option<Arc<AnnotatedFrame>>,
    pub counters: SessionCounters,
    /// Identities accepted this session, in order of first acceptance.
    pub present: Vec<Attendee>,
    /// Most recent run-level error (capture or ledger); cleared by a successful start.
    pub last_error: Option<String>,
    /// Increments on every publish.
    pub sequence: u64,
}

impl PipelineSnapshot {
    pub fn summary(&self) -> AttendanceSummary {
        let total = self.counters.gallery_size;
        let present = self.counters.identified;
        AttendanceSummary {
            total,
            present,
            absent: total.saturating_sub(present),
            unknown: self.counters.unknown,
            attendees: self.present.clone(),
        }
    }
}

/// Tunables the coordinator needs from the daemon configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub device: String,
    pub match_threshold: f32,
    pub unknown_merge_threshold: f32,
    pub cooldown: chrono::Duration,
    pub process_every_n_frames: NonZeroU32,
    pub loop_interval: Duration,
    pub warmup_frames: usize,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            device: config.camera_device.clone(),
            match_threshold: config.match_threshold,
            unknown_merge_threshold: config.unknown_merge_threshold,
            cooldown: config.cooldown,
            process_every_n_frames: config.process_every_n_frames,
            loop_interval: config.loop_interval,
            warmup_frames: config.warmup_frames,
        }
    }
}

/// Messages sent from handles to the pipeline thread.
struct Request {
    command: Command,
    reply: oneshot::Sender<Result<PipelineState, PipelineError>>,
}

/// Clone-safe handle to the pipeline thread.
///
/// The thread releases the device and exits once every handle is dropped.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Arc<PipelineSnapshot>>,
}

impl PipelineHandle {
    pub async fn start(&self) -> Result<PipelineState, PipelineError> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<PipelineState, PipelineError> {
        self.send(Command::Stop).await
    }

    pub async fn pause(&self) -> Result<PipelineState, PipelineError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<PipelineState, PipelineError> {
        self.send(Command::Resume).await
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.snapshots.borrow().clone()
    }

    async fn send(&self, command: Command) -> Result<PipelineState, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)?
    }
}

/// Spawn the coordinator on a dedicated OS thread, initially `Idle`.
pub fn spawn_pipeline(
    backend: Box<dyn CaptureBackend>,
    embedder: Box<dyn FaceEmbedder>,
    gallery: Arc<Gallery>,
    ledger: AttendanceLedger,
    settings: PipelineSettings,
) -> Result<PipelineHandle, PipelineError> {
    let (published, snapshots) = watch::channel(Arc::new(PipelineSnapshot::default()));
    let mut coordinator = Coordinator::new(backend, embedder, gallery, ledger, settings, published);
    coordinator.publish();

    let (tx, rx) = mpsc::channel::<Request>(8);
    std::thread::Builder::new()
        .name("rollcall-pipeline".into())
        .spawn(move || coordinator.run(rx))?;

    Ok(PipelineHandle { tx, snapshots })
}

/// State owned by one run; cleared on stop.
struct Session {
    throttle: FrameThrottle,
    cooldown: CooldownTracker,
    unknowns: UnknownDeduplicator,
    present: Vec<IdentityId>,
    /// Overlays from the last processed frame, reused for passthrough frames.
    overlays: Vec<Overlay>,
}

impl Session {
    fn new(settings: &PipelineSettings, embedder: &dyn FaceEmbedder) -> Self {
        Self {
            throttle: FrameThrottle::new(settings.process_every_n_frames),
            cooldown: CooldownTracker::new(settings.cooldown),
            unknowns: UnknownDeduplicator::new(settings.unknown_merge_threshold, embedder.metric()),
            present: Vec::new(),
            overlays: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.throttle.reset();
        self.cooldown.clear();
        self.unknowns.clear();
        self.present.clear();
        self.overlays.clear();
    }
}

struct Coordinator {
    backend: Box<dyn CaptureBackend>,
    embedder: Box<dyn FaceEmbedder>,
    gallery: Arc<Gallery>,
    ledger: AttendanceLedger,
    settings: PipelineSettings,
    matcher: NearestMatcher,
    source: Option<Box<dyn CaptureSource>>,
    session: Session,
    state: PipelineState,
    last_error: Option<String>,
    latest: Option<Arc<AnnotatedFrame>>,
    published: watch::Sender<Arc<PipelineSnapshot>>,
    sequence: u64,
}

impl Coordinator {
    fn new(
        backend: Box<dyn CaptureBackend>,
        embedder: Box<dyn FaceEmbedder>,
        gallery: Arc<Gallery>,
        ledger: AttendanceLedger,
        settings: PipelineSettings,
        published: watch::Sender<Arc<PipelineSnapshot>>,
    ) -> Self {
        let matcher = NearestMatcher::new(settings.match_threshold, embedder.metric());
        let session = Session::new(&settings, embedder.as_ref());
        Self {
            backend,
            embedder,
            gallery,
            ledger,
            settings,
            matcher,
            source: None,
            session,
            state: PipelineState::Idle,
            last_error: None,
            latest: None,
            published,
            sequence: 0,
        }
    }

    fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        tracing::info!("pipeline thread started");
        loop {
            let request = if self.is_active() {
                match commands.try_recv() {
                    Ok(request) => Some(request),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.blocking_recv() {
                    Some(request) => Some(request),
                    None => break,
                }
            };

            if let Some(Request { command, reply }) = request {
                let _ = reply.send(self.handle(command));
            }

            if self.is_active() {
                self.step();
                if !self.settings.loop_interval.is_zero() {
                    std::thread::sleep(self.settings.loop_interval);
                }
            }
        }

        if self.is_active() {
            self.shutdown_run();
        }
        tracing::info!("pipeline thread exiting");
    }

    fn is_active(&self) -> bool {
        matches!(self.state, PipelineState::Running | PipelineState::Paused)
    }

    fn handle(&mut self, command: Command) -> Result<PipelineState, PipelineError> {
        tracing::debug!(%command, state = %self.state, "command received");
        match (command, self.state) {
            (Command::Start, PipelineState::Idle) => self.start(),
            (Command::Stop, PipelineState::Running | PipelineState::Paused) => {
                tracing::info!("stop requested");
                self.shutdown_run();
                Ok(self.state)
            }
            (Command::Pause, PipelineState::Running) => {
                self.state = PipelineState::Paused;
                tracing::info!("preview paused");
                self.publish();
                Ok(self.state)
            }
            (Command::Resume, PipelineState::Paused) => {
                self.state = PipelineState::Running;
                tracing::info!("preview resumed");
                self.publish();
                Ok(self.state)
            }
            // Repeats of the current state are no-ops.
            (Command::Start, PipelineState::Running | PipelineState::Paused)
            | (Command::Stop, PipelineState::Idle)
            | (Command::Pause, PipelineState::Paused)
            | (Command::Resume, PipelineState::Running) => Ok(self.state),
            (command, state) => Err(PipelineError::InvalidTransition { command, state }),
        }
    }

    fn start(&mut self) -> Result<PipelineState, PipelineError> {
        self.state = PipelineState::Initializing;
        self.publish();

        match self.open_source() {
            Ok(source) => {
                self.source = Some(source);
                self.last_error = None;
                self.state = PipelineState::Running;
                tracing::info!(
                    device = %self.settings.device,
                    gallery = self.gallery.len(),
                    every_n = self.session.throttle.every_n(),
                    cooldown_ms = self.session.cooldown.window().num_milliseconds(),
                    "pipeline running"
                );
                self.publish();
                Ok(self.state)
            }
            Err(e) => {
                tracing::error!(device = %self.settings.device, error = %e, "failed to start capture");
                self.last_error = Some(e.to_string());
                self.state = PipelineState::Idle;
                self.publish();
                Err(e.into())
            }
        }
    }

    /// Open the device and discard warmup frames for camera AGC/AE stabilization.
    fn open_source(&mut self) -> Result<Box<dyn CaptureSource>, CameraError> {
        let mut source = self.backend.open(&self.settings.device)?;
        if self.settings.warmup_frames > 0 {
            tracing::debug!(count = self.settings.warmup_frames, "discarding warmup frames");
        }
        for _ in 0..self.settings.warmup_frames {
            match source.read() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    source.release();
                    return Err(CameraError::EndOfStream(self.settings.device.clone()));
                }
                Err(e) => {
                    source.release();
                    return Err(e);
                }
            }
        }
        Ok(source)
    }

    /// The single cleanup path: Running/Paused → Stopped → Idle.
    fn shutdown_run(&mut self) {
        self.state = PipelineState::Stopped;
        if let Some(source) = self.source.take() {
            source.release();
        }
        self.session.clear();
        self.latest = None;
        self.publish();

        self.state = PipelineState::Idle;
        self.publish();
        tracing::info!("pipeline stopped; session cleared");
    }

    /// One loop iteration: read a frame, maybe detect, maybe publish.
    fn step(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let e = CameraError::EndOfStream(self.settings.device.clone());
                self.abort_run(e);
                return;
            }
            Err(e) => {
                self.abort_run(e);
                return;
            }
        };

        let detected = self.session.throttle.should_process();
        if detected {
            self.session.overlays = self.detect(&frame);
        }
        self.latest = Some(Arc::new(AnnotatedFrame {
            frame,
            overlays: self.session.overlays.clone(),
            detected,
        }));

        if self.state == PipelineState::Running {
            self.publish();
        }
    }

    fn abort_run(&mut self, error: CameraError) {
        tracing::error!(device = %self.settings.device, error = %error, "capture failed; stopping");
        self.last_error = Some(error.to_string());
        self.shutdown_run();
    }

    /// Decide every face in `frame`, feeding the cooldown, dedup and ledger.
    fn detect(&mut self, frame: &Frame) -> Vec<Overlay> {
        if frame.is_dark {
            tracing::trace!(frame = frame.sequence, "dark frame; detection skipped");
            return Vec::new();
        }
        let now = frame.captured_at;
        let regions = match self.embedder.locate_faces(frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(frame = frame.sequence, error = %e, "face location failed; frame skipped");
                return Vec::new();
            }
        };
        if regions.is_empty() {
            return Vec::new();
        }

        let encodings = self.embedder.encode(frame, &regions);
        let mut overlays = Vec::with_capacity(regions.len());

        for (bbox, encoded) in regions.into_iter().zip(encodings) {
            let embedding = match encoded {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(frame = frame.sequence, error = %e, "face not encoded; skipped");
                    continue;
                }
            };

            let result = self.matcher.decide(&embedding, &self.gallery);
            match result.decision {
                Decision::Known(id) => {
                    let name = self.gallery.identity(id).name.clone();
                    tracing::debug!(name = %name, distance = ?result.distance, "known face");
                    if self
                        .session
                        .cooldown
                        .accept(&CooldownKey::Identity(name.clone()), now)
                    {
                        if let Err(e) = self.record_sighting(id, now) {
                            tracing::error!(name = %name, error = %e, "attendance not recorded");
                            self.last_error = Some(e.to_string());
                        }
                    }
                    overlays.push(Overlay {
                        bbox,
                        label: name,
                        kind: OverlayKind::Known,
                    });
                }
                Decision::Unknown => {
                    tracing::debug!(distance = ?result.distance, "unknown face");
                    if self.session.cooldown.accept(&CooldownKey::Unknown, now)
                        && self.session.unknowns.register_unknown(embedding)
                    {
                        tracing::info!(unknown = self.session.unknowns.len(), "new unknown face");
                    }
                    overlays.push(Overlay {
                        bbox,
                        label: UNKNOWN_LABEL.to_string(),
                        kind: OverlayKind::Unknown,
                    });
                }
            }
        }
        overlays
    }

    /// Write the ledger row if absent and mark the identity present.
    ///
    /// On error nothing is marked, so a later accepted sighting retries.
    fn record_sighting(&mut self, id: IdentityId, at: DateTime<Local>) -> Result<(), PipelineError> {
        let name = self.gallery.identity(id).name.as_str();
        if self.ledger.try_record(name, at)? {
            tracing::info!(name, at = %at.format("%H:%M:%S"), "first sighting recorded");
        } else {
            tracing::debug!(name, "already in ledger");
        }
        if !self.session.present.contains(&id) {
            self.session.present.push(id);
        }
        Ok(())
    }

    fn publish(&mut self) {
        self.sequence += 1;
        let snapshot = PipelineSnapshot {
            state: self.state,
            frame: self.latest.clone(),
            counters: SessionCounters {
                gallery_size: self.gallery.len(),
                identified: self.session.present.len(),
                unknown: self.session.unknowns.len(),
            },
            present: self
                .session
                .present
                .iter()
                .map(|&id| {
                    let identity = self.gallery.identity(id);
                    Attendee {
                        name: identity.name.clone(),
                        meta: identity.meta.clone(),
                    }
                })
                .collect(),
            last_error: self.last_error.clone(),
            sequence: self.sequence,
        };
        self.published.send_replace(Arc::new(snapshot));
    }
}
