//! Outbound path shared by every component
//!
//! Build, pre-flight, deliver, then account for the result. An oversized
//! message is the one failure the user hears about; everything else is
//! logged by the transport and counted here.

use std::collections::VecDeque;

use altsync_transport::{send, Route, SendOutcome, Transport};
use altsync_wire::{Codec, Message};

use crate::{Notice, RuntimeStats};

/// Borrowed sending context for one handler or timer run
pub struct Outbound<'a> {
    pub transport: &'a dyn Transport,
    pub codec: &'a Codec,
    pub stats: &'a mut RuntimeStats,
    pub notices: &'a mut VecDeque<Notice>,
}

impl Outbound<'_> {
    /// Encode and send one message. Returns whether the host accepted it.
    pub fn send(&mut self, message: &Message, route: &Route) -> bool {
        let kind = message.kind();
        let Some(bytes) = self.codec.build(message) else {
            self.stats.encode_failures += 1;
            return false;
        };

        match send(self.transport, &bytes, route) {
            SendOutcome::Sent => {
                self.stats.messages_out += 1;
                self.stats.bytes_out += bytes.len() as u64;
                true
            }
            SendOutcome::TooLarge { len, cap } => {
                self.stats.send_failures += 1;
                self.notices.push_back(Notice::MessageTooLarge { kind, len, cap });
                false
            }
            _ => {
                self.stats.send_failures += 1;
                false
            }
        }
    }
}
