//! Per-envelope flag bits carried in the frame header.

use bitflags::bitflags;

bitflags! {
    /// Flags describing how an envelope's payload is encoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvelopeFlags: u8 {
        /// The payload is a sealed blob (`nonce ‖ ciphertext ‖ tag`).
        const SEALED = 0b0000_0001;
    }
}

impl EnvelopeFlags {
    /// Parse flags off the wire, rejecting bits this version does not know.
    pub fn from_wire(bits: u8) -> Option<Self> {
        Self::from_bits(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_rejected() {
        assert_eq!(EnvelopeFlags::from_wire(0), Some(EnvelopeFlags::empty()));
        assert_eq!(EnvelopeFlags::from_wire(1), Some(EnvelopeFlags::SEALED));
        assert_eq!(EnvelopeFlags::from_wire(0b1000_0000), None);
    }
}
