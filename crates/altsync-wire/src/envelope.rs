//! Versioned binary envelope
//!
//! Envelope = Version (1) + Flags (1) + Payload
//!
//! The payload is the bincode form of the value (varint integers, little
//! endian). Payloads longer than the compression threshold are zstd
//! compressed, but only when that actually makes them smaller.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use altsync_core::{DecodeError, EncodeError};

use crate::EnvelopeFlags;

/// Current envelope format version
pub const WIRE_VERSION: u8 = 1;

/// Version byte + flags byte
pub const ENVELOPE_HEADER_SIZE: usize = 2;

/// Payloads above this many bytes are considered for compression
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100;

/// zstd level used for compression
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Upper bound on a decoded payload; inbound frames are tiny, so anything
/// that expands past this is hostile or corrupt
pub const MAX_DECODED_SIZE: usize = 4096;

/// Codec configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Minimum serialized size (exclusive) before compression is attempted
    pub compression_threshold: usize,
    /// zstd compression level
    pub compression_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Envelope encoder/decoder. Pure and stateless apart from its config.
#[derive(Clone, Debug, Default)]
pub struct Codec {
    config: CodecConfig,
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_DECODED_SIZE as u64)
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Codec { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Serialize `value` into an envelope
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let raw = bincode_options()
            .serialize(value)
            .map_err(|e| EncodeError::Serialize(e.to_string()))?;

        if raw.is_empty() {
            return Err(EncodeError::Empty);
        }

        let mut flags = EnvelopeFlags::NONE;
        let payload = if raw.len() > self.config.compression_threshold {
            match zstd::bulk::compress(&raw, self.config.compression_level) {
                Ok(compressed) if compressed.len() < raw.len() => {
                    flags.set_compressed(true);
                    compressed
                }
                Ok(_) => raw,
                Err(e) => {
                    tracing::debug!("compression failed, sending raw: {}", e);
                    raw
                }
            }
        } else {
            raw
        };

        let mut buf = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
        buf.push(WIRE_VERSION);
        buf.push(flags.into());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Open an envelope and deserialize its payload
    pub fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, DecodeError> {
        if buf.len() < ENVELOPE_HEADER_SIZE {
            return Err(DecodeError::TooShort { actual: buf.len() });
        }

        if buf[0] != WIRE_VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: WIRE_VERSION,
                actual: buf[0],
            });
        }

        let flags = EnvelopeFlags::new(buf[1]);
        let body = &buf[ENVELOPE_HEADER_SIZE..];

        let decompressed;
        let payload = if flags.is_compressed() {
            decompressed = zstd::bulk::decompress(body, MAX_DECODED_SIZE)
                .map_err(|e| DecodeError::DecompressFailed(e.to_string()))?;
            decompressed.as_slice()
        } else {
            body
        };

        bincode_options()
            .deserialize(payload)
            .map_err(|e| DecodeError::DeserializeFailed(e.to_string()))
    }
}

/// Encode with the default codec
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Codec::default().encode(value)
}

/// Decode with the default codec
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, DecodeError> {
    Codec::default().decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u64>,
    }

    #[test]
    fn test_small_value_stays_raw() {
        let value = Sample {
            name: "short".into(),
            values: vec![1, 2, 3],
        };
        let bytes = encode(&value).unwrap();

        assert_eq!(bytes[0], WIRE_VERSION);
        assert!(!EnvelopeFlags::new(bytes[1]).is_compressed());
        assert_eq!(decode::<Sample>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_repetitive_value_is_compressed() {
        let value = Sample {
            name: "a".repeat(400),
            values: vec![7; 50],
        };
        let bytes = encode(&value).unwrap();

        assert!(EnvelopeFlags::new(bytes[1]).is_compressed());
        assert!(bytes.len() < 400);
        assert_eq!(decode::<Sample>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let codec = Codec::new(CodecConfig {
            compression_threshold: usize::MAX,
            ..CodecConfig::default()
        });
        let value = "b".repeat(500);
        let bytes = codec.encode(&value).unwrap();

        assert!(!EnvelopeFlags::new(bytes[1]).is_compressed());
        assert_eq!(codec.decode::<String>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_unit_value_is_empty() {
        assert_eq!(encode(&()), Err(EncodeError::Empty));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode::<u32>(&[WIRE_VERSION]),
            Err(DecodeError::TooShort { actual: 1 })
        );
        assert_eq!(decode::<u32>(&[]), Err(DecodeError::TooShort { actual: 0 }));
    }

    #[test]
    fn test_decode_version_mismatch() {
        let mut bytes = encode(&42u32).unwrap();
        bytes[0] = WIRE_VERSION + 1;
        assert_eq!(
            decode::<u32>(&bytes),
            Err(DecodeError::VersionMismatch {
                expected: WIRE_VERSION,
                actual: WIRE_VERSION + 1
            })
        );
    }

    #[test]
    fn test_decode_bad_compressed_body() {
        let bytes = [WIRE_VERSION, EnvelopeFlags::COMPRESSED, 0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(
            decode::<u32>(&bytes),
            Err(DecodeError::DecompressFailed(_))
        ));
    }

    #[test]
    fn test_decode_bad_payload() {
        // A string length prefix far past the end of the buffer
        let bytes = [WIRE_VERSION, 0, 0xfb, 0xff, 0xff, 0x00, 0x00];
        assert!(matches!(
            decode::<String>(&bytes),
            Err(DecodeError::DeserializeFailed(_))
        ));
    }

    #[test]
    fn test_reserved_flag_bits_ignored() {
        let mut bytes = encode(&1234u32).unwrap();
        bytes[1] |= 0b1000_0000;
        assert_eq!(decode::<u32>(&bytes).unwrap(), 1234);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(name in ".{0,300}", values in prop::collection::vec(any::<u64>(), 0..40)) {
            let value = Sample { name, values };
            let bytes = encode(&value).unwrap();
            prop_assert_eq!(decode::<Sample>(&bytes).unwrap(), value);
        }
    }
}
