//! Destinations queue exchanges until a connection to their origin is free.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use http::uri::Scheme;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::connection::Connection;
use super::error::Error;
use super::exchange::Exchange;
use super::request::Request;

/// Identifies an origin by scheme, host and port.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DestinationKey(Scheme, String, u16);

impl DestinationKey {
    /// Create a key for the given origin.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self(scheme, host.into(), port)
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.0, self.1, self.2)
    }
}

impl From<&Request> for DestinationKey {
    fn from(request: &Request) -> Self {
        Self(request.scheme().clone(), request.host().to_owned(), request.port())
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<Arc<Exchange>>,
    idle: Vec<Connection>,
}

/// Exchanges waiting for a connection to one origin, and the idle connections which can carry them.
pub struct Destination {
    key: DestinationKey,
    state: Mutex<State>,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Destination")
            .field("key", &self.key)
            .field("queued", &state.queue.len())
            .field("idle", &state.idle.len())
            .finish()
    }
}

impl Destination {
    pub(crate) fn new(key: DestinationKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: Mutex::new(State::default()),
        })
    }

    /// The origin this destination serves.
    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    /// Number of exchanges waiting for a connection.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of connections waiting for an exchange.
    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Hand a connection to this destination, which will keep it busy with queued exchanges.
    pub fn offer(self: &Arc<Self>, connection: Connection) {
        connection.set_destination(self);
        trace!(destination = %self.key, connection = connection.id(), "offered");
        self.release(connection);
    }

    pub(crate) fn enqueue(&self, exchange: Arc<Exchange>) {
        trace!(destination = %self.key, ?exchange, "queued");
        self.state.lock().queue.push_back(exchange);
        self.process();
    }

    /// A connection has finished its exchange and can take another.
    pub(crate) fn release(&self, connection: Connection) {
        {
            let mut state = self.state.lock();
            if !state.idle.iter().any(|idle| idle.is(&connection)) {
                state.idle.push(connection);
            }
        }
        self.process();
    }

    /// Pair queued exchanges with idle connections.
    ///
    /// Dispatch happens outside the lock, since starting an exchange calls into
    /// the sender and may complete (and release) synchronously.
    fn process(&self) {
        loop {
            let (exchange, connection) = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    return;
                }
                let Some(connection) = state.idle.pop() else {
                    return;
                };
                let Some(exchange) = state.queue.pop_front() else {
                    state.idle.push(connection);
                    return;
                };
                exchange.set_dispatching(true);
                (exchange, connection)
            };

            trace!(destination = %self.key, ?exchange, connection = connection.id(), "dispatch");
            match connection.dispatch(&exchange) {
                Ok(()) => {}
                Err(Error::Pipelining) => {
                    // The connection was taken directly; it comes back when released.
                    let cause = {
                        let mut state = self.state.lock();
                        exchange.set_dispatching(false);
                        let cause = exchange.abort_cause();
                        if cause.is_none() {
                            state.queue.push_front(exchange.clone());
                        }
                        cause
                    };
                    if let Some(cause) = cause {
                        self.abort(&exchange, cause);
                    }
                }
                Err(error) => {
                    exchange.set_dispatching(false);
                    exchange.fail(error);
                }
            }
        }
    }

    /// Remove a queued exchange, returning `true` if it was still queued.
    pub fn remove(&self, exchange: &Exchange) -> bool {
        let mut state = self.state.lock();
        let position = state
            .queue
            .iter()
            .position(|queued| std::ptr::eq(Arc::as_ptr(queued), exchange));
        match position {
            Some(position) => {
                state.queue.remove(position);
                true
            }
            None => false,
        }
    }

    /// Fail an exchange which was removed from the queue before it was ever bound.
    pub fn abort(&self, exchange: &Arc<Exchange>, cause: Error) {
        debug!(destination = %self.key, ?exchange, %cause, "aborting queued exchange");
        exchange.fail(cause);
        exchange.terminate_request();
        exchange.terminate_response();
    }
}
