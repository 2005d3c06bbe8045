//! Encoded video units streamed during a capture session.
//!
//! Frames bypass command/response pairing: they are pushed on the
//! remote-control tag as they come out of the encoder.
//!
//! ```json
//! { "type": 32, "seq": 17, "data": "<base64>", "timestamp": 1700000000000 }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TetherError;

/// Discriminator marking a body as a screen frame.
pub const FRAME_BODY_TYPE: u8 = 32;

/// One encoded unit pulled from the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUnit {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub bytes: Bytes,
}

impl FrameUnit {
    pub fn body(&self) -> FrameBody {
        FrameBody {
            kind: FRAME_BODY_TYPE,
            seq: self.seq,
            data: STANDARD.encode(&self.bytes),
            timestamp: self.timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameBody {
    #[serde(rename = "type")]
    pub kind: u8,
    pub seq: u64,
    pub data: String,
    pub timestamp: u64,
}

impl FrameBody {
    pub fn to_bytes(&self) -> Result<Bytes, TetherError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TetherError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decoded unit bytes.
    pub fn unit_bytes(&self) -> Result<Vec<u8>, TetherError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| TetherError::Encoding(e.to_string()))
    }
}
