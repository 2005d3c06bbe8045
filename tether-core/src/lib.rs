//! # tether-core
//!
//! Protocol engine for the tether remote device agent.
//!
//! This crate contains:
//! - **Wire types**: `Envelope`, `EnvelopeFlags`, `Command`, `CommandKind`, `Response`
//! - **Codec**: `EnvelopeCodec` for framed TCP I/O via `tokio_util`
//! - **Crypto**: `TransportCodec` (AES-256-GCM) and the per-channel `CipherSlot`
//! - **Network**: `Channel` with reconnect backoff, `Connection` per TCP stream
//! - **Dispatch**: `Dispatcher` routing orders to `CommandHandler`s
//! - **Capture**: `CapturePipeline` driving a platform `CaptureBackend`
//! - **Input**: `InputBridge` for touch, swipe and long-press injection
//! - **Device / Audit**: collaborator traits the host implements
//! - **Task**: `TaskPool` for named, cancellable background work
//! - **Error**: `TetherError`, a `thiserror`-based error hierarchy

pub mod audit;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod crypto;
pub mod device;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod flags;
pub mod input;
pub mod message;
pub mod network;
pub mod protocol;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use audit::{AuditLevel, AuditLog, MemoryAuditLog, Pruned, SessionId, SessionStatus};
pub use capture::{CaptureBackend, CapturePipeline, CaptureState, StartOutcome, StopOutcome};
pub use codec::EnvelopeCodec;
pub use crypto::{CipherSlot, EncryptionKey, TransportCodec};
pub use device::{DeviceServices, GeoPoint};
pub use dispatch::{CommandHandler, Dispatcher, HandlerContext, Outcome, install_defaults};
pub use envelope::Envelope;
pub use error::{CryptoError, TaskError, TetherError};
pub use flags::EnvelopeFlags;
pub use input::{InjectionCapability, InputBridge, TouchEvent};
pub use message::{CameraFacing, Command, CommandKind, Point, TouchAction};
pub use network::{
    Channel, ChannelEvent, ChannelEvents, ChannelSender, ConnectionInfo, EnvelopeSink,
    ReconnectPolicy,
};
pub use protocol::{Attachment, FrameUnit, Response};
pub use state::ConnectionPhase;
pub use task::{TaskId, TaskPool};
