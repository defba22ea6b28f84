//! Identity types for altsync
//!
//! A peer is identified by a `<name>#<discriminator>` key. The key is checked
//! for shape only; nothing about it is cryptographically verified.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Shortest well-formed key, e.g. `A#1`
pub const MIN_PEER_KEY_LEN: usize = 3;

/// Longest accepted key in bytes
pub const MAX_PEER_KEY_LEN: usize = 64;

/// Longest accepted discriminator in digits
pub const MAX_DISCRIMINATOR_LEN: usize = 10;

/// Globally unique, stable player key
///
/// Deserialization does not validate; inbound data goes through
/// [`PeerKey::validate`] in the protocol layer so rejections can be logged.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerKey(String);

impl PeerKey {
    /// Parse and validate a key
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let key = PeerKey(s.to_owned());
        key.validate()?;
        Ok(key)
    }

    /// Wrap a string without checking its format
    #[inline]
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        PeerKey(s.into())
    }

    /// Check the `<name>#<discriminator>` shape
    pub fn validate(&self) -> Result<(), ValidationError> {
        let s = self.0.as_str();
        let malformed = || ValidationError::MalformedPeerKey(s.to_owned());

        if s.len() < MIN_PEER_KEY_LEN || s.len() > MAX_PEER_KEY_LEN {
            return Err(malformed());
        }

        let (name, discriminator) = s.split_once('#').ok_or_else(malformed)?;

        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control() || c == '#') {
            return Err(malformed());
        }

        if discriminator.is_empty()
            || discriminator.len() > MAX_DISCRIMINATOR_LEN
            || !discriminator.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }

        Ok(())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name part (before `#`)
    pub fn name(&self) -> &str {
        self.0.split_once('#').map(|(n, _)| n).unwrap_or(&self.0)
    }

    /// Discriminator part (after `#`)
    pub fn discriminator(&self) -> &str {
        self.0.split_once('#').map(|(_, d)| d).unwrap_or("")
    }

    /// Encoded length on the wire (string bytes, excluding the length prefix)
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for PeerKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeerKey::parse(s)
    }
}

impl AsRef<str> for PeerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
