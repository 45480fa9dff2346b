//! # Connection Session
//!
//! Purpose: Own one transport and run the write → parse → dispatch cycle
//! for the requests issued through a `Session` handle.
//!
//! ## Design Principles
//! 1. **One Task per Session**: A spawned driver task is the only code that
//!    touches the transport, the queue and the parser, so no locking is
//!    needed. Callbacks run inside it.
//! 2. **Explicit Suspension Points**: The driver awaits exactly one transport
//!    operation at a time: connect, write, or the parser's next read.
//! 3. **Strict FIFO**: The head request is written, its reply is read and
//!    dispatched, then the next request is written.
//! 4. **No Hidden Recovery**: Protocol and transport errors close the
//!    session; nothing is retried or reconnected.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --first request--> Connecting --connected--> Ready <--> Busy
//!                                      |                      |
//!                                      |                SUBSCRIBE written
//!                                      |                      v
//!                                      +--------------> Subscribed
//!                      close / fatal error from any state --> Closed
//! ```

use respline_common::{Command, IntoArg, Reply};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::parser::ReplyParser;
use crate::pool::TransportPool;
use crate::pubsub::{subscribe_command, PubSubChannel};
use crate::queue::{Delivery, PendingQueue, PendingRequest};
use crate::transport::{Connector, TcpConnector, TcpTransport, Transport};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport yet; connecting waits for the first request.
    Disconnected,
    /// Connect in progress; requests are buffered.
    Connecting,
    /// Connected with nothing awaiting a reply.
    Ready,
    /// A request has been written and its reply is being read.
    Busy,
    /// Every reply goes to the persistent subscribe callback.
    Subscribed,
    /// Transport released; no further callbacks are invoked.
    Closed,
}

enum Message {
    Request(PendingRequest),
    Close,
}

/// Handle to a session driven by a background task.
///
/// Creating a session never blocks: the connection is opened lazily when the
/// first request arrives. Dropping the handle without `close()` lets the
/// driver finish the requests already issued, then release the transport.
pub struct Session {
    addr: String,
    tx: Option<mpsc::UnboundedSender<Message>>,
    state: watch::Receiver<SessionState>,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    /// Session over TCP with default configuration.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn new(addr: impl Into<String>) -> Self {
        Session::with_config(ClientConfig::new(addr))
    }

    /// Session over TCP.
    pub fn with_config(config: ClientConfig) -> Self {
        let connector = TcpConnector::from_config(&config);
        Session::with_parts(config, connector, None)
    }

    /// Session over TCP drawing its transport from `pool` when one is idle.
    pub fn with_pool(config: ClientConfig, pool: TransportPool<TcpTransport>) -> Self {
        let connector = TcpConnector::from_config(&config);
        Session::with_parts(config, connector, Some(pool))
    }

    /// Session with an explicit connector and optional pool.
    ///
    /// A pooled transport is checked out here, so the session starts `Ready`
    /// instead of `Disconnected`.
    pub fn with_parts<C: Connector>(
        config: ClientConfig,
        connector: C,
        pool: Option<TransportPool<C::Transport>>,
    ) -> Self {
        let addr = config.addr;
        let transport = pool.as_ref().and_then(|pool| pool.checkout(&addr));
        let initial = if transport.is_some() {
            SessionState::Ready
        } else {
            SessionState::Disconnected
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let driver = Driver {
            addr: addr.clone(),
            connector,
            pool,
            rx,
            rx_open: true,
            state: state_tx,
            queue: PendingQueue::new(),
            parser: ReplyParser::new(),
            push: None,
            awaiting_reply: false,
        };
        let handle = tokio::spawn(driver.run(transport));

        Session {
            addr,
            tx: Some(tx),
            state: state_rx,
            driver: Some(handle),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Returns true once `close()` was called or the driver has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Queues `command`; `callback` is invoked once with its reply.
    ///
    /// Replies are delivered in the order requests were issued. A `-` reply
    /// arrives as `ClientError::Server` and the session stays usable.
    ///
    /// # Errors
    /// `ClientError::Encoding` for an empty command and `ClientError::Closed`
    /// for a closed session; the callback is not invoked in either case.
    pub fn fetch<F>(&self, command: Command, callback: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Reply>) + Send + 'static,
    {
        self.submit(command, Delivery::Reply(Some(Box::new(callback))))
    }

    /// Queues `command` without a callback.
    pub fn send(&self, command: Command) -> ClientResult<()> {
        self.submit(command, Delivery::Reply(None))
    }

    /// Queues `command` and waits for its reply.
    pub async fn call(&self, command: Command) -> ClientResult<Reply> {
        let (tx, rx) = oneshot::channel();
        self.fetch(command, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.unwrap_or(Err(ClientError::Closed))
    }

    /// Issues `SUBSCRIBE channel` and turns `callback` into the session's
    /// persistent delivery target.
    ///
    /// The callback sees the subscribe confirmation and then every pushed
    /// message, in arrival order. Once the SUBSCRIBE is written, ordinary
    /// requests on this session fail with `ClientError::SubscribeActive`.
    /// A later `subscribe` replaces the callback.
    pub fn subscribe<F>(&self, channel: impl IntoArg, callback: F) -> ClientResult<()>
    where
        F: FnMut(ClientResult<Reply>) + Send + 'static,
    {
        self.submit(
            subscribe_command(channel),
            Delivery::Subscribe(Box::new(callback)),
        )
    }

    /// Like `subscribe`, delivering into a channel instead of a callback.
    pub fn subscribe_stream(
        &self,
        channel: impl IntoArg,
    ) -> ClientResult<mpsc::UnboundedReceiver<ClientResult<Reply>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(channel, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(rx)
    }

    /// Closes the session. Idempotent.
    ///
    /// Callbacks still queued are dropped without being invoked. An idle,
    /// open transport is returned to the pool if the session has one.
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Close);
        }
    }

    /// Waits until the driver task has stopped and released the transport.
    pub async fn closed(&mut self) {
        if let Some(handle) = self.driver.take() {
            if let Err(err) = handle.await {
                warn!(addr = %self.addr, error = %err, "session driver aborted");
            }
        }
    }

    fn submit(&self, command: Command, delivery: Delivery) -> ClientResult<()> {
        let tx = self.tx.as_ref().ok_or(ClientError::Closed)?;
        let request = PendingRequest::new(command, delivery)?;
        tx.send(Message::Request(request))
            .map_err(|_| ClientError::Closed)
    }
}

enum Event {
    Message(Option<Message>),
    Reply(ClientResult<Reply>),
}

enum Exit {
    /// `close()` was called.
    Closed,
    /// The handle was dropped and all issued requests were answered.
    Detached,
    /// Fatal protocol, transport or queue error.
    Failed(ClientError),
}

struct Driver<C: Connector> {
    addr: String,
    connector: C,
    pool: Option<TransportPool<C::Transport>>,
    rx: mpsc::UnboundedReceiver<Message>,
    // False once every handle is gone; outstanding requests still complete.
    rx_open: bool,
    state: watch::Sender<SessionState>,
    queue: PendingQueue,
    parser: ReplyParser,
    push: Option<PubSubChannel>,
    // The head of `queue` has been written and its reply is outstanding.
    awaiting_reply: bool,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self, transport: Option<C::Transport>) {
        let mut transport = match transport {
            Some(transport) => transport,
            None => match self.connect().await {
                Ok(Some(transport)) => transport,
                Ok(None) => return self.finish(None, Exit::Closed),
                Err(err) => return self.finish(None, Exit::Failed(err)),
            },
        };
        let exit = self.serve(&mut transport).await;
        self.finish(Some(transport), exit);
    }

    /// Disconnected → Connecting → Ready.
    ///
    /// Requests issued while the connect is in flight are held in an explicit
    /// buffer and flushed into the queue, in order, once it completes.
    async fn connect(&mut self) -> ClientResult<Option<C::Transport>> {
        match self.rx.recv().await {
            Some(Message::Request(request)) => self.queue.enqueue(request),
            Some(Message::Close) | None => return Ok(None),
        }

        self.set_state(SessionState::Connecting);
        let mut buffered = Vec::new();
        let connect = self.connector.connect(&self.addr);
        tokio::pin!(connect);

        let result = loop {
            let event = tokio::select! {
                result = &mut connect => Ok(result),
                message = self.rx.recv(), if self.rx_open => Err(message),
            };
            match event {
                Ok(result) => break result,
                Err(Some(Message::Request(request))) => buffered.push(request),
                Err(Some(Message::Close)) => return Ok(None),
                Err(None) => self.rx_open = false,
            }
        };

        for request in buffered {
            self.queue.enqueue(request);
        }
        match result {
            Ok(transport) => {
                debug!(addr = %self.addr, queued = self.queue.len(), "connected");
                Ok(Some(transport))
            }
            Err(err) => Err(ClientError::Transport(err)),
        }
    }

    async fn serve(&mut self, transport: &mut C::Transport) -> Exit {
        self.set_state(SessionState::Ready);
        loop {
            if let Err(err) = self.issue_next(transport).await {
                return Exit::Failed(err);
            }
            if !self.rx_open && self.is_drained() {
                return Exit::Detached;
            }

            // The parser is polled even when nothing is outstanding so that
            // an unsolicited reply is detected rather than misattributed.
            let event = tokio::select! {
                biased;
                message = self.rx.recv(), if self.rx_open => Event::Message(message),
                reply = self.parser.next_reply(transport) => Event::Reply(reply),
            };

            match event {
                Event::Message(Some(Message::Request(request))) => self.queue.enqueue(request),
                Event::Message(Some(Message::Close)) => return Exit::Closed,
                Event::Message(None) => self.rx_open = false,
                Event::Reply(Ok(reply)) => {
                    if let Err(err) = self.dispatch(reply) {
                        return Exit::Failed(err);
                    }
                }
                Event::Reply(Err(err)) => return Exit::Failed(err),
            }
        }
    }

    /// Writes the head request unless a reply is already outstanding.
    async fn issue_next(&mut self, transport: &mut C::Transport) -> ClientResult<()> {
        while !self.awaiting_reply {
            let (subscribe, frame) = match self.queue.front() {
                Some(head) => {
                    trace!(addr = %self.addr, request = ?head, "issuing request");
                    (head.is_subscribe(), head.frame().clone())
                }
                None => {
                    if self.push.is_none() {
                        self.set_state(SessionState::Ready);
                    }
                    return Ok(());
                }
            };

            if self.push.is_some() || subscribe {
                let request = self.queue.dequeue()?;
                self.issue_in_push_mode(request, transport).await?;
                continue;
            }

            transport.write_all(&frame).await?;
            self.awaiting_reply = true;
            self.set_state(SessionState::Busy);
        }
        Ok(())
    }

    /// Handles a request that either enters or arrives during subscribe mode.
    async fn issue_in_push_mode(
        &mut self,
        request: PendingRequest,
        transport: &mut C::Transport,
    ) -> ClientResult<()> {
        if !request.is_subscribe() {
            request.complete(Err(ClientError::SubscribeActive));
            return Ok(());
        }

        transport.write_all(request.frame()).await?;
        let callback = match request.into_delivery() {
            Delivery::Subscribe(callback) => callback,
            Delivery::Reply(_) => return Ok(()),
        };

        match self.push.as_mut() {
            Some(channel) => channel.replace(callback),
            None => {
                self.push = Some(PubSubChannel::new(callback));
                self.set_state(SessionState::Subscribed);
                // Requests issued after the subscribe can no longer be told
                // apart from pushes.
                for request in self.queue.drain() {
                    request.complete(Err(ClientError::SubscribeActive));
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, reply: Reply) -> ClientResult<()> {
        if let Some(channel) = self.push.as_mut() {
            trace!(addr = %self.addr, delivered = channel.delivered(), "push reply");
            channel.deliver(reply);
            return Ok(());
        }
        if !self.awaiting_reply {
            return Err(ClientError::EmptyQueue);
        }
        let request = self.queue.dequeue()?;
        self.awaiting_reply = false;
        request.complete(reply.into_result().map_err(ClientError::from));
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.push.is_some() || (self.queue.is_empty() && !self.awaiting_reply)
    }

    fn finish(mut self, transport: Option<C::Transport>, exit: Exit) {
        match exit {
            Exit::Closed | Exit::Detached => {
                if !self.queue.is_empty() {
                    debug!(
                        addr = %self.addr,
                        abandoned = self.queue.len(),
                        "closing with pending requests"
                    );
                }
                if let Some(transport) = transport {
                    self.release(transport);
                }
            }
            Exit::Failed(err) => {
                warn!(addr = %self.addr, error = %err, "session failed");
                self.rx.close();
                while let Ok(message) = self.rx.try_recv() {
                    if let Message::Request(request) = message {
                        self.queue.enqueue(request);
                    }
                }
                self.fail_pending(err);
            }
        }
        self.set_state(SessionState::Closed);
    }

    /// The request at the head receives `err`; every later one `Closed`.
    fn fail_pending(&mut self, err: ClientError) {
        let mut requests = self.queue.drain();
        match self.push.take() {
            Some(channel) => channel.fail(err),
            None => {
                if let Some(head) = requests.next() {
                    head.complete(Err(err));
                }
            }
        }
        for request in requests {
            request.complete(Err(ClientError::Closed));
        }
    }

    /// Hands the transport back to the pool when it sits at a frame boundary
    /// with nothing outstanding; otherwise it is dropped.
    fn release(&self, transport: C::Transport) {
        let reusable = !self.awaiting_reply && self.parser.is_idle() && self.push.is_none();
        match &self.pool {
            Some(pool) if reusable => {
                pool.checkin(&self.addr, transport);
            }
            _ => debug!(addr = %self.addr, "dropping transport"),
        }
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(addr = %self.addr, state = ?next, "session state");
        }
    }
}
