//! The structured reply to a command.
//!
//! ```json
//! { "success": true, "message": "Screen capture stopped" }
//! { "success": false, "error": "Screen capture permission denied" }
//! { "success": true, "data": { ... } }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TetherError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Success with a human-readable message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    /// Success carrying a data payload.
    pub fn data(data: Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    /// Failure with a reason.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, TetherError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TetherError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Attachment ───────────────────────────────────────────────────

/// A named binary blob produced by a device service (photo, file, audio clip).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// JSON form used in reply data: `{ "name", "size", "data": base64 }`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "size": self.bytes.len(),
            "data": STANDARD.encode(&self.bytes),
        })
    }
}
