//! The unit of exchange on the wire.

use bytes::Bytes;

use crate::flags::EnvelopeFlags;

/// Inbound command envelopes carry this tag.
pub const ORDER_TAG: &str = "order";

/// Liveness probe from the controller.
pub const PING_TAG: &str = "ping";

/// Reply to [`PING_TAG`].
pub const PONG_TAG: &str = "pong";

/// A tagged message: a short routing string plus an opaque payload.
///
/// Envelopes are immutable values. Whether `payload` is plaintext or a
/// sealed blob is recorded in `flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: String,
    pub payload: Bytes,
    pub flags: EnvelopeFlags,
}

impl Envelope {
    /// A plaintext envelope.
    pub fn new(tag: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
            flags: EnvelopeFlags::empty(),
        }
    }

    /// An envelope whose payload is already sealed.
    pub fn sealed(tag: impl Into<String>, blob: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            payload: blob.into(),
            flags: EnvelopeFlags::SEALED,
        }
    }

    pub fn ping() -> Self {
        Self::new(PING_TAG, Bytes::new())
    }

    pub fn pong() -> Self {
        Self::new(PONG_TAG, Bytes::new())
    }

    pub fn is_sealed(&self) -> bool {
        self.flags.contains(EnvelopeFlags::SEALED)
    }

    pub fn is_ping(&self) -> bool {
        self.tag == PING_TAG
    }
}
