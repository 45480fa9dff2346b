//! # Transport Pool
//!
//! Purpose: Let a closing session hand its idle transport to the next
//! session for the same address instead of opening a new connection.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of idle transports per address.
//! 2. **Explicit Handle**: The pool is passed to sessions, never global state.
//! 3. **Ownership Is the Contract**: A transport is moved out on checkout and
//!    moved back on checkin, so it is never both pooled and in use.
//! 4. **Minimal Locking**: Hold the mutex only while moving transports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::config::ClientConfig;
use crate::transport::Transport;

struct PoolInner<T> {
    max_idle_per_addr: usize,
    idle: Mutex<HashMap<String, Vec<T>>>,
}

/// Address-keyed pool of idle transports.
///
/// Cloning the handle shares the same pool.
pub struct TransportPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for TransportPool<T> {
    fn clone(&self) -> Self {
        TransportPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> TransportPool<T> {
    /// Creates a pool keeping at most `max_idle_per_addr` transports per address.
    pub fn new(max_idle_per_addr: usize) -> Self {
        TransportPool {
            inner: Arc::new(PoolInner {
                max_idle_per_addr,
                idle: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a pool sized by `config.max_idle_per_addr`.
    pub fn from_config(config: &ClientConfig) -> Self {
        TransportPool::new(config.max_idle_per_addr)
    }

    /// Takes an idle, still-open transport for `addr`.
    ///
    /// Closed transports found on the way are discarded.
    pub fn checkout(&self, addr: &str) -> Option<T> {
        let mut idle = self.lock();
        let transports = idle.get_mut(addr)?;
        while let Some(transport) = transports.pop() {
            if !transport.is_closed() {
                debug!(addr, "transport checked out of pool");
                return Some(transport);
            }
            debug!(addr, "discarding closed pooled transport");
        }
        None
    }

    /// Returns a transport to the pool.
    ///
    /// The transport is dropped instead when it reports itself closed, still
    /// holds unread bytes, or the address already holds `max_idle_per_addr`
    /// idle transports. Returns true when it was kept.
    pub fn checkin(&self, addr: &str, transport: T) -> bool {
        if transport.is_closed() {
            debug!(addr, "refusing closed transport");
            return false;
        }
        if transport.buffered() > 0 {
            debug!(addr, unread = transport.buffered(), "refusing transport with unread bytes");
            return false;
        }
        let mut idle = self.lock();
        let transports = idle.entry(addr.to_string()).or_default();
        if transports.len() >= self.inner.max_idle_per_addr {
            debug!(addr, "pool full; dropping transport");
            return false;
        }
        transports.push(transport);
        debug!(addr, idle = transports.len(), "transport returned to pool");
        true
    }

    /// Number of idle transports held for `addr`.
    pub fn idle_count(&self, addr: &str) -> usize {
        self.lock().get(addr).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<T>>> {
        // A panicking holder cannot leave the map half-updated.
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
