//! Capture session lifecycle.
//!
//! At most one session exists at a time:
//!
//! ```text
//!  Idle ──start──► AwaitingPermission ──consent──► Configuring ──► Streaming
//!   ▲                     │ denied/cancel               │ fail          │ stop/fatal
//!   │                     ▼                             ▼               ▼
//!   └──────────────────────────────────────────────── Releasing ◄───────┘
//! ```
//!
//! `start` only validates and spawns; the session task does the slow work
//! and reports asynchronous failures on the remote-control tag.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::backend::{
    CaptureBackend, CaptureConsent, DEQUEUE_TIMEOUT, Dequeued, EncoderProfile, InputSurface,
    RETRY_DELAY, VideoEncoder, VirtualDisplay,
};
use crate::clock::now_ms;
use crate::error::{TaskError, TetherError};
use crate::message::CommandKind;
use crate::network::EnvelopeSink;
use crate::protocol::{FrameUnit, Response};
use crate::task::{TaskId, TaskPool};

pub const UNSUPPORTED_REASON: &str = "Requires Android 5.0 or higher";
pub const CONFLICT_REASON: &str = "Screen capture already active";
pub const CONSENT_DENIED_REASON: &str = "Screen capture permission denied";
pub const START_ACCEPTED_MESSAGE: &str = "Screen capture request sent";
pub const STOPPED_MESSAGE: &str = "Screen capture stopped";
pub const NOT_ACTIVE_MESSAGE: &str = "Screen capture not active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    AwaitingPermission,
    Configuring,
    Streaming,
    Releasing,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    Unsupported,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    Rejected(StartRejection),
}

impl StartOutcome {
    pub fn response(self) -> Response {
        match self {
            StartOutcome::Accepted => Response::ok(START_ACCEPTED_MESSAGE),
            StartOutcome::Rejected(StartRejection::Unsupported) => {
                Response::failure(UNSUPPORTED_REASON)
            }
            StartOutcome::Rejected(StartRejection::Conflict) => Response::failure(CONFLICT_REASON),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotActive,
}

impl StopOutcome {
    pub fn response(self) -> Response {
        match self {
            StopOutcome::Stopped => Response::ok(STOPPED_MESSAGE),
            StopOutcome::NotActive => Response::ok(NOT_ACTIVE_MESSAGE),
        }
    }
}

// ── Shared session state ─────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionSlot {
    state: CaptureState,
    task: Option<TaskId>,
}

struct Shared {
    backend: Arc<dyn CaptureBackend>,
    sink: Arc<dyn EnvelopeSink>,
    profile: EncoderProfile,
    slot: Mutex<SessionSlot>,
    frame_seq: AtomicU64,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CaptureState) {
        let mut slot = self.slot();
        debug!(from = %slot.state, to = %state, "capture state");
        slot.state = state;
    }

    /// Sequence number for the next unit. Only advanced once a unit is
    /// handed to the sink, so delivered frames never skip a number. At most
    /// one session streams at a time.
    fn pending_seq(&self) -> u64 {
        self.frame_seq.load(Ordering::Relaxed)
    }

    fn advance_seq(&self) {
        self.frame_seq.fetch_add(1, Ordering::Relaxed);
    }

    async fn report_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "capture session failed");
        match Response::failure(reason).to_bytes() {
            Ok(body) => {
                if let Err(e) = self.sink.send(CommandKind::RemoteControl.tag(), body).await {
                    debug!(error = %e, "could not deliver capture failure");
                }
            }
            Err(e) => warn!(error = %e, "could not encode capture failure"),
        }
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Owner of the single capture session.
#[derive(Clone)]
pub struct CapturePipeline {
    shared: Arc<Shared>,
    tasks: Arc<TaskPool>,
    // Serializes start/stop; the session task never takes it.
    control: Arc<tokio::sync::Mutex<()>>,
}

impl CapturePipeline {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        sink: Arc<dyn EnvelopeSink>,
        tasks: Arc<TaskPool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                sink,
                profile: EncoderProfile::STANDARD,
                slot: Mutex::new(SessionSlot::default()),
                frame_seq: AtomicU64::new(0),
            }),
            tasks,
            control: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.slot().state
    }

    /// Units delivered to the sink over the pipeline's lifetime. Also the
    /// next sequence number.
    pub fn frames_emitted(&self) -> u64 {
        self.shared.frame_seq.load(Ordering::Relaxed)
    }

    /// Validate and launch a session. Returns without waiting for consent.
    pub async fn start(&self) -> StartOutcome {
        let _control = self.control.lock().await;

        if !self.shared.backend.is_supported() {
            info!("capture rejected: platform unsupported");
            return StartOutcome::Rejected(StartRejection::Unsupported);
        }

        {
            let mut slot = self.shared.slot();
            if slot.state != CaptureState::Idle {
                info!(state = %slot.state, "capture rejected: session already active");
                return StartOutcome::Rejected(StartRejection::Conflict);
            }
            slot.state = CaptureState::AwaitingPermission;
        }

        let shared = Arc::clone(&self.shared);
        let id = self
            .tasks
            .spawn("capture-session", move |token| run_session(shared, token));
        self.shared.slot().task = Some(id);
        info!(task = %id, "capture session accepted");
        StartOutcome::Accepted
    }

    /// Cancel the active session and wait until its resources are released.
    pub async fn stop(&self) -> StopOutcome {
        let _control = self.control.lock().await;

        let task = {
            let slot = self.shared.slot();
            match slot.state {
                CaptureState::Idle | CaptureState::Releasing => return StopOutcome::NotActive,
                _ => slot.task,
            }
        };

        if let Some(id) = task {
            self.tasks.cancel(id);
            if let Err(e) = self.tasks.join(id).await {
                warn!(error = %e, "capture session ended abnormally");
            }
        }
        self.shared.set_state(CaptureState::Idle);
        info!("capture session stopped");
        StopOutcome::Stopped
    }
}

// ── Session task ─────────────────────────────────────────────────

async fn run_session(shared: Arc<Shared>, token: CancellationToken) -> Result<(), TetherError> {
    let consent = tokio::select! {
        _ = token.cancelled() => None,
        r = shared.backend.request_consent() => Some(r),
    };

    let consent = match consent {
        None => {
            shared.set_state(CaptureState::Idle);
            return Err(TaskError::Cancelled.into());
        }
        Some(Ok(Some(consent))) => consent,
        Some(Ok(None)) => {
            shared.set_state(CaptureState::Idle);
            shared.report_failure(CONSENT_DENIED_REASON).await;
            return Ok(());
        }
        Some(Err(e)) => {
            shared.set_state(CaptureState::Idle);
            shared.report_failure(format!("{CONSENT_DENIED_REASON}: {e}")).await;
            return Ok(());
        }
    };

    shared.set_state(CaptureState::Configuring);
    let mut resources = match configure(shared.backend.as_ref(), consent, &shared.profile) {
        Ok(r) => r,
        Err(e) => {
            shared.set_state(CaptureState::Idle);
            shared
                .report_failure(format!("Failed to start screen capture: {e}"))
                .await;
            return Ok(());
        }
    };

    shared.set_state(CaptureState::Streaming);
    info!("capture streaming");
    let result = stream(&shared, resources.encoder.as_mut(), &token).await;

    shared.set_state(CaptureState::Releasing);
    resources.release();
    shared.set_state(CaptureState::Idle);

    if let Err(e) = result {
        shared.report_failure(format!("{STOPPED_MESSAGE}: {e}")).await;
    }
    Ok(())
}

struct CaptureResources {
    consent: Box<dyn CaptureConsent>,
    encoder: Box<dyn VideoEncoder>,
    surface: Box<dyn InputSurface>,
    display: Box<dyn VirtualDisplay>,
}

impl CaptureResources {
    /// Display, encoder, surface, consent; every step runs even if an
    /// earlier one failed.
    fn release(&mut self) {
        release_step("display", self.display.release());
        release_step("encoder", self.encoder.release());
        release_step("surface", self.surface.release());
        release_step("consent", self.consent.release());
    }
}

fn release_step(resource: &'static str, result: Result<(), TetherError>) {
    if let Err(e) = result {
        warn!(resource, error = %e, "release failed");
    }
}

/// Allocate encoder, surface, and display in that order. On failure every
/// earlier allocation is released in reverse before returning.
fn configure(
    backend: &dyn CaptureBackend,
    mut consent: Box<dyn CaptureConsent>,
    profile: &EncoderProfile,
) -> Result<CaptureResources, TetherError> {
    let mut encoder = match backend.create_encoder(profile) {
        Ok(e) => e,
        Err(e) => {
            release_step("consent", consent.release());
            return Err(allocation("encoder", e));
        }
    };

    let mut surface = match backend.create_input_surface(encoder.as_mut()) {
        Ok(s) => s,
        Err(e) => {
            release_step("encoder", encoder.release());
            release_step("consent", consent.release());
            return Err(allocation("surface", e));
        }
    };

    let started = encoder.start().and_then(|()| {
        backend.create_virtual_display(consent.as_ref(), profile, surface.as_ref())
    });
    let display = match started {
        Ok(d) => d,
        Err(e) => {
            release_step("surface", surface.release());
            release_step("encoder", encoder.release());
            release_step("consent", consent.release());
            return Err(allocation("display", e));
        }
    };

    Ok(CaptureResources {
        consent,
        encoder,
        surface,
        display,
    })
}

fn allocation(resource: &'static str, e: TetherError) -> TetherError {
    match e {
        TetherError::Allocation { .. } => e,
        other => TetherError::Allocation {
            resource,
            reason: other.to_string(),
        },
    }
}

/// Pump encoded units until cancelled. A dequeue error ends the session;
/// a failed send only drops that unit, and its number is reused.
async fn stream(
    shared: &Shared,
    encoder: &mut dyn VideoEncoder,
    token: &CancellationToken,
) -> Result<(), TetherError> {
    let tag = CommandKind::RemoteControl.tag();

    while !token.is_cancelled() {
        match encoder.dequeue(DEQUEUE_TIMEOUT).await? {
            Dequeued::Unit(bytes) if bytes.is_empty() => {}
            Dequeued::Unit(bytes) => {
                let unit = FrameUnit {
                    seq: shared.pending_seq(),
                    timestamp_ms: now_ms(),
                    bytes,
                };
                let body = unit.body().to_bytes()?;
                match shared.sink.send(tag, body).await {
                    Ok(()) => shared.advance_seq(),
                    Err(e) => debug!(seq = unit.seq, error = %e, "frame dropped"),
                }
            }
            Dequeued::FormatChanged => debug!("encoder output format changed"),
            Dequeued::TryAgainLater => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
