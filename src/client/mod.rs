//! The client side of an HTTP exchange.
//!
//! A [`Client`] turns each request into a [`Conversation`]: one or more
//! [`Exchange`]s, each a single request/response attempt carried by a
//! [`Connection`]. Requests submitted to the client wait at their
//! [`Destination`] until a connection to that origin is free; requests sent
//! directly on a connection are bound to it immediately or refused.
//!
//! Writing and reading bytes is left to the [`Sender`] and [`Receiver`] each
//! connection is created with. They report progress back to the exchange, and the
//! exchange reports a single [`Outcome`] to its [`ResponseListener`]s once both the
//! request and the response have completed.
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use parley::client::{Client, Receiver, Sender};
//! # async fn run(sender: Arc<dyn Sender>, receiver: Arc<dyn Receiver>) -> Result<(), parley::client::Error> {
//! let client = Client::default();
//! let request: parley::client::Request = "http://example.com/".parse()?;
//! let _connection = client.connect_to(&(&request).into(), sender, receiver);
//! let outcome = client.send(request).await?;
//! println!("{}", outcome.response().status());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub use self::builder::{Builder, Config};
pub use self::connection::{Connection, Receiver, Sender};
pub use self::conversation::Conversation;
pub use self::destination::{Destination, DestinationKey};
pub use self::error::{Error, UriError};
pub use self::exchange::{Completion, Exchange};
pub use self::listener::{Listeners, ResponseListener};
pub use self::outcome::Outcome;
pub use self::redirect::RedirectListener;
pub use self::request::{Content, Request, RequestId};
pub use self::response::Response;

use self::connection::normalize_request;
use self::weakopt::WeakOpt;

mod builder;
mod connection;
mod conversation;
mod destination;
mod error;
mod exchange;
mod listener;
#[cfg(test)]
pub(crate) mod mock;
mod outcome;
mod redirect;
mod request;
mod response;
mod weakopt;

/// Inner type for managing the client's conversations and destinations.
pub(crate) struct ClientRef {
    config: Config,
    conversations: Mutex<HashMap<RequestId, Arc<Conversation>>>,
    destinations: Mutex<HashMap<DestinationKey, Arc<Destination>>>,
}

/// The entry point for sending requests.
///
/// Cloning a client is cheap, and every clone shares the same conversations
/// and destinations.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("conversations", &self.inner.conversations.lock().len())
            .field("destinations", &self.inner.destinations.lock().len())
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Builder::default().build()
    }
}

impl Client {
    /// Create a client with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(ClientRef {
                config,
                conversations: Mutex::new(HashMap::new()),
                destinations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a new builder for clients.
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn from_ref(inner: Arc<ClientRef>) -> Self {
        Self { inner }
    }

    /// The client's configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of conversations which have not completed yet.
    pub fn conversations(&self) -> usize {
        self.inner.conversations.lock().len()
    }

    /// The conversation `request` belongs to, created if this is a new request.
    ///
    /// Requests which share a [`RequestId`] share a conversation until it completes.
    pub fn conversation_for(&self, request: &Request) -> Arc<Conversation> {
        let id = request.id();
        let conversation = {
            let mut conversations = self.inner.conversations.lock();
            if let Some(conversation) = conversations.get(&id) {
                return conversation.clone();
            }
            let conversation = Conversation::new(id);
            conversations.insert(id, conversation.clone());
            conversation
        };
        trace!(%id, "new conversation");

        let client = WeakOpt::downgrade(&self.inner);
        conversation.on_complete(move |conversation| {
            if let Some(client) = client.upgrade() {
                Client::from_ref(client).forget(conversation);
            }
        });
        conversation
    }

    /// Stop tracking a conversation.
    pub(crate) fn forget(&self, conversation: &Conversation) {
        let mut conversations = self.inner.conversations.lock();
        let tracked = conversations
            .get(&conversation.id())
            .is_some_and(|tracked| std::ptr::eq(Arc::as_ptr(tracked), conversation));
        if tracked {
            conversations.remove(&conversation.id());
            trace!(id = %conversation.id(), "conversation forgotten");
        }
    }

    /// The destination for an origin, created on first use.
    pub fn destination_for(&self, key: &DestinationKey) -> Arc<Destination> {
        self.inner
            .destinations
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(destination = %key, "new destination");
                Destination::new(key.clone())
            })
            .clone()
    }

    /// Create a connection which is not attached to any destination.
    ///
    /// Requests must be sent on it directly with [`Connection::send`].
    pub fn connect(&self, sender: Arc<dyn Sender>, receiver: Arc<dyn Receiver>) -> Connection {
        Connection::new(self, sender, receiver)
    }

    /// Create a connection and hand it to the destination for `key`, which keeps it
    /// busy with submitted requests.
    pub fn connect_to(
        &self,
        key: &DestinationKey,
        sender: Arc<dyn Sender>,
        receiver: Arc<dyn Receiver>,
    ) -> Connection {
        let connection = Connection::new(self, sender, receiver);
        self.destination_for(key).offer(connection.clone());
        connection
    }

    /// Queue a request at its destination.
    ///
    /// The request is normalized and joined to its conversation. If the
    /// conversation has a listener staged for its next exchange, that listener is
    /// used instead of `listeners`.
    pub fn submit(&self, mut request: Request, listeners: Listeners) -> Arc<Exchange> {
        normalize_request(&mut request, self.inner.config.user_agent.as_ref());

        let conversation = self.conversation_for(&request);
        let listeners = conversation
            .response_listener()
            .map(Listeners::from)
            .unwrap_or(listeners);

        let destination = self.destination_for(&DestinationKey::from(&request));
        let exchange = Exchange::new(
            conversation.clone(),
            Some(&destination),
            request,
            listeners,
        );
        conversation.add(&exchange);
        destination.enqueue(exchange.clone());
        exchange
    }

    /// Send a request, resolving with the outcome of its conversation.
    pub fn send(&self, request: Request) -> ResponseFuture {
        self.send_with(request, Listeners::new())
    }

    /// Send a request with additional listeners.
    ///
    /// When redirects are followed, `listeners` only observe the final response.
    pub fn send_with(&self, request: Request, mut listeners: Listeners) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        listeners.push(Arc::new(Delivery(Mutex::new(Some(tx)))));

        let conversation = self.conversation_for(&request);
        let listeners = if self.inner.config.follow_redirects {
            match RedirectListener::new(
                self,
                conversation.clone(),
                &request,
                listeners,
                self.inner.config.max_redirects,
            ) {
                Ok(redirect) => Listeners::from(redirect as Arc<dyn ResponseListener>),
                Err(error) => {
                    self.forget(&conversation);
                    return ResponseFuture::error(error);
                }
            }
        } else {
            listeners
        };

        self.submit(request, listeners);
        ResponseFuture::new(rx, conversation)
    }
}

/// Hands the outcome to a [`ResponseFuture`].
struct Delivery(Mutex<Option<oneshot::Sender<Outcome>>>);

impl ResponseListener for Delivery {
    fn on_complete(&self, outcome: &Outcome) {
        if let Some(tx) = self.0.lock().take() {
            if tx.send(outcome.clone()).is_err() {
                trace!("response future dropped before delivery");
            }
        }
    }
}

/// The eventual outcome of a request sent through [`Client::send`].
///
/// The same future covers every redirect the request triggers.
#[pin_project::pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    #[pin]
    rx: Option<oneshot::Receiver<Outcome>>,
    error: Option<Error>,
    conversation: Option<Arc<Conversation>>,
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("conversation", &self.conversation)
            .finish()
    }
}

impl ResponseFuture {
    fn new(rx: oneshot::Receiver<Outcome>, conversation: Arc<Conversation>) -> Self {
        Self {
            rx: Some(rx),
            error: None,
            conversation: Some(conversation),
        }
    }

    fn error(error: Error) -> Self {
        Self {
            rx: None,
            error: Some(error),
            conversation: None,
        }
    }

    /// The conversation carrying this request.
    pub fn conversation(&self) -> Option<&Arc<Conversation>> {
        self.conversation.as_ref()
    }

    /// Abort every exchange of the conversation.
    ///
    /// The future still resolves, with the aborted outcome.
    pub fn abort(&self, cause: Error) -> bool {
        self.conversation
            .as_ref()
            .is_some_and(|conversation| conversation.abort(cause))
    }
}

impl Future for ResponseFuture {
    type Output = Result<Outcome, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some(error) = this.error.take() {
            return Poll::Ready(Err(error));
        }

        match this.rx.as_pin_mut() {
            Some(rx) => rx.poll(cx).map_err(|_| Error::Canceled),
            None => Poll::Ready(Err(Error::Canceled)),
        }
    }
}

impl tower::Service<Request> for Client {
    type Response = Outcome;
    type Error = Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.send(request)
    }
}
