//! Envelope flags for altsync wire protocol

/// Envelope flags (1 byte)
///
/// Bit 0 marks a compressed payload. Bits 1-7 are reserved: senders leave
/// them clear and receivers ignore them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvelopeFlags(pub u8);

impl EnvelopeFlags {
    pub const NONE: EnvelopeFlags = EnvelopeFlags(0);

    // Flag bits
    pub const COMPRESSED: u8 = 0b0000_0001;
    pub const RESERVED: u8 = 0b1111_1110;

    #[inline]
    pub fn new(bits: u8) -> Self {
        EnvelopeFlags(bits)
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    #[inline]
    pub fn set_compressed(&mut self, value: bool) {
        if value {
            self.0 |= Self::COMPRESSED;
        } else {
            self.0 &= !Self::COMPRESSED;
        }
    }

    #[inline]
    pub fn reserved_bits(self) -> u8 {
        self.0 & Self::RESERVED
    }
}

impl From<u8> for EnvelopeFlags {
    fn from(bits: u8) -> Self {
        EnvelopeFlags(bits)
    }
}

impl From<EnvelopeFlags> for u8 {
    fn from(flags: EnvelopeFlags) -> Self {
        flags.0
    }
}
