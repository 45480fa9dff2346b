//! # Pending Requests
//!
//! Purpose: Keep the FIFO register of requests awaiting a reply. The queue
//! holds ordering only; it performs no I/O.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use respline_common::{codec, Command, Reply};

use crate::error::{ClientError, ClientResult};

/// One-shot reply callback.
pub type ReplyCallback = Box<dyn FnOnce(ClientResult<Reply>) + Send + 'static>;

/// Persistent callback receiving every push message of a subscribed session.
pub type PushCallback = Box<dyn FnMut(ClientResult<Reply>) + Send + 'static>;

/// Where the reply to a request goes.
pub enum Delivery {
    /// Ordinary request; `None` is fire-and-forget.
    Reply(Option<ReplyCallback>),
    /// SUBSCRIBE request; the callback becomes the session's push target
    /// once the request is written.
    Subscribe(PushCallback),
}

/// A request from enqueue until its reply is dispatched.
pub struct PendingRequest {
    command: Command,
    frame: Bytes,
    delivery: Delivery,
}

impl PendingRequest {
    /// Encodes `command` up front so encoding errors surface at `fetch`.
    pub fn new(command: Command, delivery: Delivery) -> ClientResult<Self> {
        let frame = codec::encode(&command)?;
        Ok(PendingRequest {
            command,
            frame,
            delivery,
        })
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Encoded request frame.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self.delivery, Delivery::Subscribe(_))
    }

    pub fn into_delivery(self) -> Delivery {
        self.delivery
    }

    /// Consumes the request, handing `result` to its callback.
    pub fn complete(self, result: ClientResult<Reply>) {
        match self.delivery {
            Delivery::Reply(Some(callback)) => callback(result),
            Delivery::Reply(None) => {}
            Delivery::Subscribe(mut callback) => callback(result),
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .command
            .name()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        f.debug_struct("PendingRequest")
            .field("command", &name)
            .field("args", &self.command.len())
            .field("subscribe", &self.is_subscribe())
            .finish()
    }
}

/// FIFO of outstanding requests.
#[derive(Debug, Default)]
pub struct PendingQueue {
    requests: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub fn new() -> Self {
        PendingQueue::default()
    }

    /// Appends to the tail.
    pub fn enqueue(&mut self, request: PendingRequest) {
        self.requests.push_back(request);
    }

    /// Pops the head.
    ///
    /// # Errors
    /// `ClientError::EmptyQueue` when nothing is pending: a reply arrived
    /// that no request asked for.
    pub fn dequeue(&mut self) -> ClientResult<PendingRequest> {
        self.requests.pop_front().ok_or(ClientError::EmptyQueue)
    }

    /// Head of the queue, the next request to issue.
    pub fn front(&self) -> Option<&PendingRequest> {
        self.requests.front()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Removes every request, in order.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.requests.drain(..)
    }
}
