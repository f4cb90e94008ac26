//! Connections bind exchanges to a transport, one at a time.
//!
//! The bytes on the wire are the business of a [`Sender`] (which writes the
//! request) and a [`Receiver`] (which reads the response). A [`Connection`] owns
//! one of each for its lifetime and holds at most one bound [`Exchange`] in a
//! single atomically swapped slot. A second send while the slot is taken is
//! pipelining, which is refused rather than queued.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

pub(crate) use self::normalize::normalize_request;
use super::destination::Destination;
use super::error::Error;
use super::exchange::Exchange;
use super::listener::Listeners;
use super::request::Request;
use super::weakopt::WeakOpt;
use super::{Client, ClientRef};

mod normalize;

/// Writes requests.
///
/// `send` must eventually call [`Exchange::request_complete`] (or one of the
/// helpers built on it) exactly once, and [`Exchange::terminate_request`] once
/// all request-side processing is done, on every path.
pub trait Sender: Send + Sync + 'static {
    /// Begin writing the exchange's request.
    fn send(&self, exchange: Arc<Exchange>);

    /// Continue (or stop) streaming the request body.
    fn proceed(&self, exchange: &Arc<Exchange>, proceed: bool) {
        let _ = (exchange, proceed);
    }

    /// Cancel the request side of a bound exchange.
    ///
    /// Returns `true` if the request was still pending.
    fn abort(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        if exchange.request_failed(cause.clone()) {
            exchange.terminate_request();
            true
        } else {
            false
        }
    }
}

/// Reads responses.
///
/// `receive` must eventually call [`Exchange::response_complete`] (or one of the
/// helpers built on it) once per response attempt, and
/// [`Exchange::terminate_response`] once all response-side processing is done.
pub trait Receiver: Send + Sync + 'static {
    /// Response data is ready to be read for this exchange.
    fn receive(&self, exchange: Arc<Exchange>);

    /// The connection has been idle while this exchange was bound.
    fn idle_timeout(&self, exchange: &Arc<Exchange>) {
        exchange.abort(Error::IdleTimeout);
    }

    /// Cancel the response side of a bound exchange.
    ///
    /// Returns `true` if the response was still pending.
    fn abort(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        if exchange.response_failed(cause.clone()) {
            exchange.terminate_response();
            true
        } else {
            false
        }
    }
}

static IDENT: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ConnectionRef {
    id: u64,
    client: WeakOpt<ClientRef>,
    destination: Mutex<WeakOpt<Destination>>,
    exchange: ArcSwapOption<Exchange>,
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
}

/// A transport which carries one exchange at a time.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionRef>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("exchange", &self.exchange())
            .field("destination", &*self.inner.destination.lock())
            .finish()
    }
}

impl Connection {
    /// Create a connection owned by `client` which sends with `sender` and receives with `receiver`.
    pub fn new(client: &Client, sender: Arc<dyn Sender>, receiver: Arc<dyn Receiver>) -> Self {
        let id = IDENT.fetch_add(1, Ordering::Relaxed);
        trace!(id, "new connection");
        Self {
            inner: Arc::new(ConnectionRef {
                id,
                client: WeakOpt::downgrade(&client.inner),
                destination: Mutex::new(WeakOpt::none()),
                exchange: ArcSwapOption::empty(),
                sender,
                receiver,
            }),
        }
    }

    pub(crate) fn from_ref(inner: Arc<ConnectionRef>) -> Self {
        Self { inner }
    }

    /// Connection identifier, for logging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The currently bound exchange.
    pub fn exchange(&self) -> Option<Arc<Exchange>> {
        self.inner.exchange.load_full()
    }

    pub(crate) fn sender(&self) -> &Arc<dyn Sender> {
        &self.inner.sender
    }

    pub(crate) fn receiver(&self) -> &Arc<dyn Receiver> {
        &self.inner.receiver
    }

    pub(crate) fn set_destination(&self, destination: &Arc<Destination>) {
        *self.inner.destination.lock() = WeakOpt::downgrade(destination);
    }

    pub(crate) fn is(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Send `request` on this connection.
    ///
    /// The request is normalized, joined to its conversation and bound to this
    /// connection. If another exchange is already bound, the request is refused
    /// with [`Error::Pipelining`]. If the conversation has a listener staged for
    /// its next exchange, that listener is used instead of `listeners`.
    pub fn send(&self, mut request: Request, listeners: Listeners) -> Result<Arc<Exchange>, Error> {
        let client = self
            .inner
            .client
            .upgrade()
            .map(Client::from_ref)
            .ok_or(Error::Closed)?;

        normalize_request(&mut request, client.config().user_agent.as_ref());

        let conversation = client.conversation_for(&request);
        let listeners = conversation
            .response_listener()
            .map(Listeners::from)
            .unwrap_or(listeners);

        let destination = self.inner.destination.lock().upgrade();
        let exchange = Exchange::new(
            conversation.clone(),
            destination.as_ref(),
            request,
            listeners,
        );

        if !self.bind(&exchange) {
            if conversation.is_empty() {
                client.forget(&conversation);
            }
            return Err(Error::Pipelining);
        }

        conversation.add(&exchange);
        self.start(&exchange);
        Ok(exchange)
    }

    /// Bind an exchange which is already part of its conversation, as a destination does.
    pub(crate) fn dispatch(&self, exchange: &Arc<Exchange>) -> Result<(), Error> {
        if !self.bind(exchange) {
            return Err(Error::Pipelining);
        }
        self.start(exchange);
        Ok(())
    }

    fn bind(&self, exchange: &Arc<Exchange>) -> bool {
        let previous = self
            .inner
            .exchange
            .compare_and_swap(&None::<Arc<Exchange>>, Some(exchange.clone()));
        match &*previous {
            None => {
                exchange.set_dispatching(true);
                trace!(connection = self.inner.id, ?exchange, "bound");
                true
            }
            Some(bound) => {
                warn!(
                    connection = self.inner.id,
                    ?bound,
                    ?exchange,
                    "pipelined requests are not supported"
                );
                false
            }
        }
    }

    fn start(&self, exchange: &Arc<Exchange>) {
        exchange.associate(&self.inner);
        exchange.set_dispatching(false);
        match exchange.abort_cause() {
            Some(cause) => {
                debug!(connection = self.inner.id, ?exchange, %cause, "aborted before send");
                self.abort_exchange(exchange, &cause);
            }
            None => self.inner.sender.send(exchange.clone()),
        }
    }

    /// Free the slot held by `exchange`, returning this connection to its destination.
    pub(crate) fn release(&self, exchange: &Exchange) {
        let current = self.inner.exchange.load();
        let held = (*current)
            .as_ref()
            .is_some_and(|bound| std::ptr::eq(Arc::as_ptr(bound), exchange));
        if !held {
            return;
        }

        let previous = self
            .inner
            .exchange
            .compare_and_swap(&*current, None::<Arc<Exchange>>);
        let released = match (&*previous, &*current) {
            (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
            _ => false,
        };
        drop(previous);
        drop(current);

        if released {
            trace!(connection = self.inner.id, ?exchange, "released");
            let destination = self.inner.destination.lock().upgrade();
            if let Some(destination) = destination {
                destination.release(self.clone());
            }
        }
    }

    /// Continue (or stop) streaming the bound exchange's request body.
    pub fn proceed(&self, proceed: bool) {
        if let Some(exchange) = self.exchange() {
            self.inner.sender.proceed(&exchange, proceed);
        }
    }

    /// The connection's read side has been idle for too long.
    ///
    /// The timeout is forwarded to the bound exchange. Returns `true` once the
    /// timeout has been handled; the connection itself stays open.
    pub fn on_read_timeout(&self) -> bool {
        match self.exchange() {
            Some(exchange) => {
                debug!(connection = self.inner.id, ?exchange, "read timeout");
                exchange.idle_timeout();
            }
            None => trace!(connection = self.inner.id, "read timeout while idle"),
        }
        true
    }

    /// Response data is ready to be read.
    ///
    /// Data with no bound exchange can't be attributed to anything, and is an error.
    pub fn on_fillable(&self) -> Result<(), Error> {
        match self.exchange() {
            Some(exchange) => {
                exchange.receive();
                Ok(())
            }
            None => {
                error!(connection = self.inner.id, "data ready with no exchange bound");
                Err(Error::NoExchange)
            }
        }
    }

    /// Abort the bound exchange, if any.
    pub fn abort(&self, cause: Error) -> bool {
        match self.exchange() {
            Some(exchange) => exchange.abort(cause),
            None => false,
        }
    }

    /// Cancel both sides of `exchange` through the sender and receiver.
    pub(crate) fn abort_exchange(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        let request = self.inner.sender.abort(exchange, cause);
        let response = self.inner.receiver.abort(exchange, cause);
        request || response
    }
}
