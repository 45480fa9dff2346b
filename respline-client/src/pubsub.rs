//! # Subscribe Mode
//!
//! Purpose: Divert a session into persistent push delivery after SUBSCRIBE.
//!
//! This is a single-callback multiplexer, not a per-channel router: once a
//! session is subscribed every reply it reads goes to one callback, so
//! ordinary requests can no longer be told apart from pushes. Use one
//! session per subscriber.

use bytes::Bytes;
use respline_common::{Command, IntoArg, Reply};

use crate::error::ClientError;
use crate::queue::PushCallback;

/// Builds `SUBSCRIBE <channel>`.
pub fn subscribe_command(channel: impl IntoArg) -> Command {
    Command::new("SUBSCRIBE").arg(channel)
}

/// Persistent delivery target of a subscribed session.
pub struct PubSubChannel {
    callback: PushCallback,
    delivered: u64,
}

impl PubSubChannel {
    pub(crate) fn new(callback: PushCallback) -> Self {
        PubSubChannel {
            callback,
            delivered: 0,
        }
    }

    /// Hands one push reply to the callback; error replies arrive as
    /// `ClientError::Server`.
    pub(crate) fn deliver(&mut self, reply: Reply) {
        self.delivered += 1;
        (self.callback)(reply.into_result().map_err(ClientError::from));
    }

    /// Reports a fatal session error as the last delivery.
    pub(crate) fn fail(mut self, err: ClientError) {
        (self.callback)(Err(err));
    }

    /// Swaps in the callback of a later SUBSCRIBE on the same session.
    pub(crate) fn replace(&mut self, callback: PushCallback) {
        self.callback = callback;
    }

    /// Number of replies delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

/// Interpreted push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// Subscription confirmed; `count` is the session's subscription total.
    Subscribe { channel: Bytes, count: i64 },
    /// Subscription removed.
    Unsubscribe { channel: Bytes, count: i64 },
    /// Message published to `channel`.
    Message { channel: Bytes, payload: Bytes },
    /// Message matched through a pattern subscription.
    PatternMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },
}

impl PushMessage {
    /// Interprets a push array; returns `None` for anything else.
    pub fn from_reply(reply: &Reply) -> Option<Self> {
        let items = reply.as_array()?;
        let kind = items.first()?.as_bytes()?;
        let bytes_at = |idx: usize| -> Option<Bytes> {
            match items.get(idx)? {
                Reply::BulkString(Some(data)) => Some(data.clone()),
                _ => None,
            }
        };

        match (kind.to_ascii_lowercase().as_slice(), items.len()) {
            (b"subscribe", 3) => Some(PushMessage::Subscribe {
                channel: bytes_at(1)?,
                count: items[2].as_integer()?,
            }),
            (b"unsubscribe", 3) => Some(PushMessage::Unsubscribe {
                channel: bytes_at(1)?,
                count: items[2].as_integer()?,
            }),
            (b"message", 3) => Some(PushMessage::Message {
                channel: bytes_at(1)?,
                payload: bytes_at(2)?,
            }),
            (b"pmessage", 4) => Some(PushMessage::PatternMessage {
                pattern: bytes_at(1)?,
                channel: bytes_at(2)?,
                payload: bytes_at(3)?,
            }),
            _ => None,
        }
    }
}
