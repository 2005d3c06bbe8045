//! Domain-specific error types for the tether protocol engine.
//!
//! All fallible operations return `Result<T, TetherError>`.
//! No panics on invalid input: every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the tether protocol engine.
#[derive(Debug, Error)]
pub enum TetherError {
    // ── Framing Errors ───────────────────────────────────────────
    /// Received bytes that do not start with the envelope magic.
    #[error("invalid magic bytes: expected TTH1")]
    InvalidMagic,

    /// A field in the frame header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The frame checksum did not match its tag and payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The tag exceeds the maximum tag length.
    #[error("tag too long: {size} bytes (max {max})")]
    TagTooLong { size: usize, max: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// There is no live connection to send on.
    #[error("not connected")]
    NotConnected,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Sealing or opening an envelope payload failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    // ── Decode Errors ────────────────────────────────────────────
    /// The envelope tag is not one the dispatcher accepts.
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// The command discriminator or sub-selector is not recognised.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A required command argument is absent or has the wrong type.
    #[error("missing or malformed argument `{0}`")]
    InvalidArgument(&'static str),

    /// Encoding or decoding of a JSON body failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Capability Errors ────────────────────────────────────────
    /// The platform lacks a feature the command needs.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Synthetic input injection is not available on this platform.
    #[error("input injection not available")]
    InjectionUnavailable,

    /// The injection primitive reported failure for an event.
    #[error("input injection failed at ({x}, {y})")]
    InjectionFailed { x: i32, y: i32 },

    /// The user or OS declined the capture consent request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // ── Resource Errors ──────────────────────────────────────────
    /// Allocating a capture resource (encoder, surface, display) failed.
    #[error("failed to allocate {resource}: {reason}")]
    Allocation {
        resource: &'static str,
        reason: String,
    },

    /// The encoder reported an unrecoverable error mid-stream.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// The requested state transition is not valid from the current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    // ── Task Errors ─────────────────────────────────────────────
    /// A spawned task failed.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── CryptoError ───────────────────────────────────────────────────

/// Errors raised by the transport codec.
///
/// Opening a blob never yields partial plaintext: every failure mode
/// collapses into one of these variants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The key is not exactly 256 bits.
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The key material was not valid base64.
    #[error("key is not valid base64")]
    InvalidKeyEncoding,

    /// No key has been set on this channel.
    #[error("encryption key not set")]
    KeyNotSet,

    /// A key was already set on this channel.
    #[error("encryption key already set")]
    KeyAlreadySet,

    /// The cipher refused to seal the plaintext.
    #[error("encryption failed")]
    SealFailed,

    /// The blob is shorter than nonce + tag.
    #[error("sealed blob truncated: {0} bytes")]
    Truncated(usize),

    /// Tag verification failed (tampered data or wrong key).
    #[error("authentication failed")]
    AuthenticationFailed,
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for supervised tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task was explicitly cancelled via `CancellationToken`.
    #[error("task was cancelled")]
    Cancelled,

    /// The task panicked or was aborted by the runtime.
    #[error("task `{0}` did not complete")]
    Join(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TetherError {
    fn from(s: String) -> Self {
        TetherError::Other(s)
    }
}

impl From<&str> for TetherError {
    fn from(s: &str) -> Self {
        TetherError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TetherError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TetherError::ChannelClosed
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        TetherError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TetherError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = TetherError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = TetherError::InvalidArgument("path");
        assert!(e.to_string().contains("`path`"));
    }

    #[test]
    fn from_string() {
        let e: TetherError = "something broke".into();
        assert!(matches!(e, TetherError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TetherError = io_err.into();
        assert!(matches!(e, TetherError::Connection(_)));
    }

    #[test]
    fn from_crypto() {
        let e: TetherError = CryptoError::AuthenticationFailed.into();
        assert!(matches!(
            e,
            TetherError::Crypto(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn from_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: TetherError = err.into();
        assert!(matches!(e, TetherError::Encoding(_)));
    }
}
