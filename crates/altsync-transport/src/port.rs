//! Transport port - the single outbound capability the core needs
//!
//! The host owns the actual messaging primitive. The core hands it a byte
//! string and a route and gets back an outcome; it never retries inline and
//! never blocks on delivery.

use std::fmt;

use altsync_wire::MAX_MESSAGE_SIZE;

/// Delivery channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every peer in the group
    Broadcast,
    /// One named peer
    Direct,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Broadcast => f.write_str("broadcast"),
            Channel::Direct => f.write_str("direct"),
        }
    }
}

/// Where a message goes
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    pub channel: Channel,
    /// Peer key for direct routes
    pub target: Option<String>,
}

impl Route {
    pub fn broadcast() -> Self {
        Route {
            channel: Channel::Broadcast,
            target: None,
        }
    }

    pub fn direct(target: impl Into<String>) -> Self {
        Route {
            channel: Channel::Direct,
            target: Some(target.into()),
        }
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.channel == Channel::Broadcast
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}", self.channel, target),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Result of one delivery attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Rejected before reaching the host
    TooLarge { len: usize, cap: usize },
    /// Host rate limit hit
    Throttled,
    /// Host refuses to send from the current context
    NotEligible,
    ChannelLocked,
    TargetUnreachable,
    Generic(String),
}

impl SendOutcome {
    #[inline]
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Sent => f.write_str("sent"),
            SendOutcome::TooLarge { len, cap } => write!(f, "too large ({} > {} bytes)", len, cap),
            SendOutcome::Throttled => f.write_str("throttled"),
            SendOutcome::NotEligible => f.write_str("not eligible"),
            SendOutcome::ChannelLocked => f.write_str("channel locked"),
            SendOutcome::TargetUnreachable => f.write_str("target unreachable"),
            SendOutcome::Generic(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Host messaging primitive
pub trait Transport: Send {
    /// Hand `bytes` to the host for delivery on `route`
    fn deliver(&self, bytes: &[u8], route: &Route) -> SendOutcome;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn deliver(&self, bytes: &[u8], route: &Route) -> SendOutcome {
        (**self).deliver(bytes, route)
    }
}

/// Send with the pre-flight size check
///
/// Oversized payloads never reach the host. Every failure is logged with the
/// reason and route; the caller decides whether it matters.
pub fn send<T: Transport + ?Sized>(transport: &T, bytes: &[u8], route: &Route) -> SendOutcome {
    let outcome = if bytes.len() > MAX_MESSAGE_SIZE {
        SendOutcome::TooLarge {
            len: bytes.len(),
            cap: MAX_MESSAGE_SIZE,
        }
    } else {
        transport.deliver(bytes, route)
    };

    match &outcome {
        SendOutcome::Sent => {}
        SendOutcome::TooLarge { .. } => {
            tracing::error!(%route, "send rejected: {}", outcome);
        }
        _ => {
            tracing::warn!(%route, "send failed: {}", outcome);
        }
    }
    outcome
}
