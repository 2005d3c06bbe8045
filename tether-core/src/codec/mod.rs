//! Length-prefixed envelope framing for `tokio_util::codec::Framed`.
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! 0      4      5      6        8            12         16
//! ┌──────┬──────┬──────┬────────┬────────────┬──────────┐
//! │ TTH1 │flags │ rsvd │tag_len │payload_len │ checksum │ tag │ payload │
//! └──────┴──────┴──────┴────────┴────────────┴──────────┘
//! ```
//!
//! `checksum` is the first four bytes of `blake3(tag ‖ payload)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::TetherError;
use crate::flags::EnvelopeFlags;

pub const MAGIC: [u8; 4] = *b"TTH1";
pub const HEADER_LEN: usize = 16;
pub const MAX_TAG_LEN: usize = 255;
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// First four bytes of the blake3 digest over tag and payload.
pub fn checksum(tag: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag);
    hasher.update(payload);
    let digest = hasher.finalize();
    let b = digest.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

// ── FrameHeader ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    flags: EnvelopeFlags,
    tag_len: usize,
    payload_len: usize,
    checksum: u32,
}

impl FrameHeader {
    /// Parse and validate a header. `src` must hold at least `HEADER_LEN` bytes.
    fn parse(src: &[u8]) -> Result<Self, TetherError> {
        if src[0..4] != MAGIC {
            return Err(TetherError::InvalidMagic);
        }
        let flags = EnvelopeFlags::from_wire(src[4])
            .ok_or(TetherError::InvalidHeader("unknown flag bits"))?;
        if src[5] != 0 {
            return Err(TetherError::InvalidHeader("reserved byte must be zero"));
        }
        let tag_len = u16::from_le_bytes([src[6], src[7]]) as usize;
        let payload_len = u32::from_le_bytes([src[8], src[9], src[10], src[11]]) as usize;
        let checksum = u32::from_le_bytes([src[12], src[13], src[14], src[15]]);

        if tag_len == 0 {
            return Err(TetherError::InvalidHeader("empty tag"));
        }
        if tag_len > MAX_TAG_LEN {
            return Err(TetherError::TagTooLong {
                size: tag_len,
                max: MAX_TAG_LEN,
            });
        }
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(TetherError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        Ok(Self {
            flags,
            tag_len,
            payload_len,
            checksum,
        })
    }

    fn frame_len(&self) -> usize {
        HEADER_LEN + self.tag_len + self.payload_len
    }
}

/// Check that `envelope` fits the frame limits, so oversized output can be
/// refused before it reaches a writer.
pub fn check_frame(envelope: &Envelope) -> Result<(), TetherError> {
    let tag_len = envelope.tag.len();
    if tag_len == 0 {
        return Err(TetherError::InvalidHeader("empty tag"));
    }
    if tag_len > MAX_TAG_LEN {
        return Err(TetherError::TagTooLong {
            size: tag_len,
            max: MAX_TAG_LEN,
        });
    }
    if envelope.payload.len() > MAX_PAYLOAD_LEN {
        return Err(TetherError::PayloadTooLarge {
            size: envelope.payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

// ── EnvelopeCodec ────────────────────────────────────────────────

/// Stateless framing codec for [`Envelope`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = TetherError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = FrameHeader::parse(&src[..HEADER_LEN])?;
        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let tag = src.split_to(header.tag_len).freeze();
        let payload = src.split_to(header.payload_len).freeze();

        if checksum(&tag, &payload) != header.checksum {
            return Err(TetherError::ChecksumMismatch);
        }

        let tag = String::from_utf8(tag.to_vec())?;
        Ok(Some(Envelope {
            tag,
            payload,
            flags: header.flags,
        }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = TetherError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        check_frame(&item)?;
        let tag = item.tag.as_bytes();

        dst.reserve(HEADER_LEN + tag.len() + item.payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u8(item.flags.bits());
        dst.put_u8(0);
        dst.put_u16_le(tag.len() as u16);
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_u32_le(checksum(tag, &item.payload));
        dst.put_slice(tag);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

/// Encode a single envelope into a standalone buffer.
pub fn encode_frame(envelope: Envelope) -> Result<Bytes, TetherError> {
    let mut buf = BytesMut::new();
    EnvelopeCodec.encode(envelope, &mut buf)?;
    Ok(buf.freeze())
}

// ── Tests ────────────────────────────────────────────────────────
