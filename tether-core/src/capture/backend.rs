//! Platform seam for screen capture.
//!
//! The pipeline drives these traits; a platform crate supplies the
//! implementations (projection consent, hardware encoder, virtual display).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TetherError;

/// Wait for one encoder output buffer.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Pause after the encoder reports nothing ready.
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

// ── EncoderProfile ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Avc,
}

impl VideoCodec {
    pub fn mime(self) -> &'static str {
        match self {
            VideoCodec::Avc => "video/avc",
        }
    }
}

/// Encoder and virtual display parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub frame_rate: u32,
    pub bit_rate: u32,
    pub keyframe_interval: Duration,
    pub codec: VideoCodec,
}

impl EncoderProfile {
    /// The fixed profile every capture session uses.
    pub const STANDARD: EncoderProfile = EncoderProfile {
        width: 480,
        height: 480,
        dpi: 160,
        frame_rate: 15,
        bit_rate: 500_000,
        keyframe_interval: Duration::from_secs(2),
        codec: VideoCodec::Avc,
    };
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}

// ── Dequeue result ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// One encoded unit (the buffer is already returned to the encoder).
    Unit(Bytes),
    /// Output format changed; informational.
    FormatChanged,
    /// Nothing ready within the timeout.
    TryAgainLater,
}

// ── Resource traits ──────────────────────────────────────────────

/// Grant returned by a successful consent prompt. Releasing it ends the
/// projection.
pub trait CaptureConsent: Send {
    fn release(&mut self) -> Result<(), TetherError>;
}

#[async_trait]
pub trait VideoEncoder: Send {
    /// Begin encoding. Called once the input surface exists.
    fn start(&mut self) -> Result<(), TetherError>;

    /// Pull the next output buffer, waiting at most `timeout`.
    async fn dequeue(&mut self, timeout: Duration) -> Result<Dequeued, TetherError>;

    /// Stop and free the encoder.
    fn release(&mut self) -> Result<(), TetherError>;
}

pub trait InputSurface: Send {
    fn release(&mut self) -> Result<(), TetherError>;
}

pub trait VirtualDisplay: Send {
    fn release(&mut self) -> Result<(), TetherError>;
}

// ── CaptureBackend ───────────────────────────────────────────────

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Whether this platform can capture the screen at all.
    fn is_supported(&self) -> bool;

    /// Ask the user/OS for capture consent. `Ok(None)` means denied.
    async fn request_consent(&self) -> Result<Option<Box<dyn CaptureConsent>>, TetherError>;

    fn create_encoder(&self, profile: &EncoderProfile)
    -> Result<Box<dyn VideoEncoder>, TetherError>;

    fn create_input_surface(
        &self,
        encoder: &mut dyn VideoEncoder,
    ) -> Result<Box<dyn InputSurface>, TetherError>;

    fn create_virtual_display(
        &self,
        consent: &dyn CaptureConsent,
        profile: &EncoderProfile,
        surface: &dyn InputSurface,
    ) -> Result<Box<dyn VirtualDisplay>, TetherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_profile() {
        let p = EncoderProfile::default();
        assert_eq!((p.width, p.height, p.dpi), (480, 480, 160));
        assert_eq!(p.frame_rate, 15);
        assert_eq!(p.bit_rate, 500_000);
        assert_eq!(p.keyframe_interval, Duration::from_secs(2));
        assert_eq!(p.codec.mime(), "video/avc");
    }
}
