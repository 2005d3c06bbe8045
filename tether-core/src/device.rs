//! Platform services the command handlers call into.
//!
//! The engine never touches cameras, storage, telephony or sensors itself.
//! A host supplies a [`DeviceServices`] implementation; every method that a
//! platform cannot honour returns [`TetherError::Unsupported`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TetherError;
use crate::message::CameraFacing;
use crate::protocol::Attachment;

/// Last known position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[async_trait]
pub trait DeviceServices: Send + Sync {
    async fn list_cameras(&self) -> Result<Value, TetherError>;

    /// Take one picture with the given camera.
    async fn capture_camera(&self, facing: CameraFacing) -> Result<Attachment, TetherError>;

    async fn list_files(&self, path: &str) -> Result<Value, TetherError>;

    async fn read_file(&self, path: &str) -> Result<Attachment, TetherError>;

    async fn list_sms(&self) -> Result<Value, TetherError>;

    /// Returns whether the message was handed to the radio.
    async fn send_sms(&self, to: &str, body: &str) -> Result<bool, TetherError>;

    async fn list_call_logs(&self) -> Result<Value, TetherError>;

    async fn list_contacts(&self) -> Result<Value, TetherError>;

    /// Record `seconds` of microphone audio.
    async fn record_mic(&self, seconds: u32) -> Result<Attachment, TetherError>;

    /// `None` when location is disabled or no fix exists yet.
    async fn last_location(&self) -> Result<Option<GeoPoint>, TetherError>;
}
