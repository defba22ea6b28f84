//! Protocol messages
//!
//! Every message travels as one envelope. The message type is the enum
//! variant, serialized as the first field of the payload, so framing never
//! mixes text delimiters with binary bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use altsync_core::{
    validate_alias, CharacterRecord, DecodeError, PeerKey, ProfileSummary, Timestamp,
    ValidationError,
};

use crate::Codec;

/// Hard cap on an encoded message, enforced before send
pub const MAX_MESSAGE_SIZE: usize = 255;

/// Encoded length above which construction logs a size warning (90% of cap)
pub const SIZE_WARNING_THRESHOLD: usize = MAX_MESSAGE_SIZE * 9 / 10;

/// Broadcast summary of the sender's own profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub owner_key: PeerKey,
    pub alias: String,
    pub alias_updated_at: Timestamp,
    pub chars_updated_at: Timestamp,
    pub char_count: u32,
}

impl Announce {
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            owner_key: self.owner_key.clone(),
            alias_updated_at: self.alias_updated_at,
            chars_updated_at: self.chars_updated_at,
            char_count: self.char_count,
        }
    }
}

/// Ask the owner for its characters added after `after`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChars {
    pub owner_key: PeerKey,
    pub after: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasUpdate {
    pub owner_key: PeerKey,
    pub alias: String,
    pub alias_updated_at: Timestamp,
}

/// One self-contained chunk of characters for a profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsUpdate {
    pub owner_key: PeerKey,
    pub records: Vec<CharacterRecord>,
    pub chars_updated_at: Timestamp,
}

/// Summaries of third-party profiles offered to one peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipDigest {
    pub from: PeerKey,
    pub entries: Vec<ProfileSummary>,
}

/// Ask a peer to relay a third-party profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipRequest {
    pub from: PeerKey,
    pub owner_key: PeerKey,
    pub after: Timestamp,
}

/// Message type tag, for logging and stats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Announce,
    RequestChars,
    AliasUpdate,
    CharsUpdate,
    GossipDigest,
    GossipRequest,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Announce => "announce",
            MessageKind::RequestChars => "request-chars",
            MessageKind::AliasUpdate => "alias-update",
            MessageKind::CharsUpdate => "chars-update",
            MessageKind::GossipDigest => "gossip-digest",
            MessageKind::GossipRequest => "gossip-request",
        };
        f.write_str(name)
    }
}

/// Closed set of protocol messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Announce(Announce),
    RequestChars(RequestChars),
    AliasUpdate(AliasUpdate),
    CharsUpdate(CharsUpdate),
    GossipDigest(GossipDigest),
    GossipRequest(GossipRequest),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Announce(_) => MessageKind::Announce,
            Message::RequestChars(_) => MessageKind::RequestChars,
            Message::AliasUpdate(_) => MessageKind::AliasUpdate,
            Message::CharsUpdate(_) => MessageKind::CharsUpdate,
            Message::GossipDigest(_) => MessageKind::GossipDigest,
            Message::GossipRequest(_) => MessageKind::GossipRequest,
        }
    }

    /// Format and range checks that need no local state
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Message::Announce(m) => {
                m.owner_key.validate()?;
                validate_alias(&m.alias)?;
                m.alias_updated_at.validate()?;
                m.chars_updated_at.validate()
            }
            Message::RequestChars(m) => {
                m.owner_key.validate()?;
                m.after.validate()
            }
            Message::AliasUpdate(m) => {
                m.owner_key.validate()?;
                validate_alias(&m.alias)?;
                m.alias_updated_at.validate()
            }
            Message::CharsUpdate(m) => {
                m.owner_key.validate()?;
                m.chars_updated_at.validate()?;
                m.records.iter().try_for_each(CharacterRecord::validate)
            }
            Message::GossipDigest(m) => {
                m.from.validate()?;
                m.entries.iter().try_for_each(ProfileSummary::validate)
            }
            Message::GossipRequest(m) => {
                m.from.validate()?;
                m.owner_key.validate()?;
                m.after.validate()
            }
        }
    }
}

impl Codec {
    /// Encode a message for sending, `None` if encoding failed
    ///
    /// Logs a warning once the encoded length passes 90% of the cap; the
    /// hard cap itself is enforced by the transport pre-flight.
    pub fn build(&self, message: &Message) -> Option<Vec<u8>> {
        match self.encode(message) {
            Ok(bytes) => {
                if bytes.len() > SIZE_WARNING_THRESHOLD {
                    tracing::warn!(
                        kind = %message.kind(),
                        len = bytes.len(),
                        cap = MAX_MESSAGE_SIZE,
                        "message close to size cap"
                    );
                }
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(kind = %message.kind(), "failed to encode message: {}", e);
                None
            }
        }
    }

    /// Decode an inbound message
    pub fn parse(&self, buf: &[u8]) -> Result<Message, DecodeError> {
        self.decode(buf)
    }
}

/// Build with the default codec
pub fn build(message: &Message) -> Option<Vec<u8>> {
    Codec::default().build(message)
}

/// Parse with the default codec
pub fn parse(buf: &[u8]) -> Result<Message, DecodeError> {
    Codec::default().parse(buf)
}
