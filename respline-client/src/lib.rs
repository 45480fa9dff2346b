//! # respline Async Client
//!
//! Purpose: Provide a non-blocking RESP client that pipelines requests over
//! one persistent connection and matches replies to requests in strict
//! order, with a subscribe mode for push messages.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: Replies are rebuilt from grammar-sized reads,
//!    so partial delivery never needs a full frame in memory up front.
//! 2. **FIFO Dispatch**: Each reply goes to the oldest outstanding request.
//! 3. **Injectable Collaborators**: Transports come from a `Connector` and can
//!    be recycled through an explicit `TransportPool`.
//! 4. **Fail Fast**: Protocol and transport errors close the session; retry
//!    policy belongs to the caller.
//!
//! ## Example
//!
//! ```no_run
//! use respline_client::{Command, Session};
//!
//! # async fn demo() -> Result<(), respline_client::ClientError> {
//! let session = Session::new("127.0.0.1:6379");
//! session.send(Command::new("LPUSH").arg("l").arg(1))?;
//! session.fetch(Command::new("LPUSH").arg("l").arg(2), |reply| println!("{:?}", reply))?;
//! let items = session.call(Command::new("LRANGE").arg("l").arg(0).arg(-1)).await?;
//! println!("{}", items);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod parser;
mod pool;
mod pubsub;
mod queue;
mod session;
mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use parser::{ParserState, ReplyParser, MAX_BULK_LEN};
pub use pool::TransportPool;
pub use pubsub::{subscribe_command, PubSubChannel, PushMessage};
pub use queue::{Delivery, PendingQueue, PendingRequest, PushCallback, ReplyCallback};
pub use session::{Session, SessionState};
pub use transport::{Connector, StreamTransport, TcpConnector, TcpTransport, Transport};

pub use respline_common::{Command, IntoArg, Reply, RespError};
