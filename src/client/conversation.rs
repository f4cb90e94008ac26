//! Conversations chain the exchanges of one logical request.
//!
//! A conversation starts with the caller's request and grows by one exchange for
//! each redirect (or other follow-up) it triggers. The single listener slot lets a
//! listener on one exchange pick the listener for the next one: it is staged
//! before the follow-up is submitted and taken when that exchange is admitted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::Error;
use super::exchange::Exchange;
use super::listener::ResponseListener;
use super::request::RequestId;

type OnComplete = Box<dyn FnOnce(&Conversation) + Send>;

#[derive(Default)]
struct State {
    exchanges: VecDeque<Weak<Exchange>>,
    listener: Option<Arc<dyn ResponseListener>>,
    on_complete: Vec<OnComplete>,
    completed: bool,
}

impl State {
    fn is_terminal(&self) -> bool {
        if self.listener.is_some() {
            return false;
        }

        match self.exchanges.back() {
            Some(tail) => tail.upgrade().map_or(true, |exchange| exchange.is_complete()),
            None => false,
        }
    }

    /// Mark the conversation complete if it just became terminal, returning the callbacks to run.
    fn settle(&mut self) -> Option<Vec<OnComplete>> {
        if self.completed || !self.is_terminal() {
            return None;
        }
        self.completed = true;
        Some(std::mem::take(&mut self.on_complete))
    }
}

/// The ordered exchanges implementing one logical request.
pub struct Conversation {
    id: RequestId,
    state: Mutex<State>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("exchanges", &state.exchanges.len())
            .field("staged", &state.listener.is_some())
            .field("completed", &state.completed)
            .finish()
    }
}

impl Conversation {
    /// Start an empty conversation for the request identified by `id`.
    pub fn new(id: RequestId) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(State::default()),
        })
    }

    /// The identifier shared by every request in this conversation.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The exchanges of this conversation which are still alive, oldest first.
    pub fn exchanges(&self) -> Vec<Arc<Exchange>> {
        self.state
            .lock()
            .exchanges
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// The most recently admitted exchange.
    pub fn last(&self) -> Option<Arc<Exchange>> {
        self.state.lock().exchanges.back().and_then(Weak::upgrade)
    }

    /// Returns `true` if no exchange has been admitted yet.
    pub fn is_empty(&self) -> bool {
        self.state.lock().exchanges.is_empty()
    }

    /// The listener staged for the next exchange, if any.
    pub fn response_listener(&self) -> Option<Arc<dyn ResponseListener>> {
        self.state.lock().listener.clone()
    }

    /// Stage (or with `None`, unstage) the listener for the next exchange.
    ///
    /// While a listener is staged the conversation can't complete.
    pub fn set_response_listener(&self, listener: Option<Arc<dyn ResponseListener>>) {
        let callbacks = {
            let mut state = self.state.lock();
            trace!(id = %self.id, staged = listener.is_some(), "response listener");
            state.listener = listener;
            state.settle()
        };
        self.run(callbacks);
    }

    /// Register a callback for when the conversation's terminal exchange completes.
    ///
    /// Runs immediately if the conversation has already completed.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Conversation) + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.completed {
            drop(state);
            callback(self);
        } else {
            state.on_complete.push(Box::new(callback));
        }
    }

    /// Append an exchange, taking the staged listener slot.
    ///
    /// Returns `true` if this is the conversation's first exchange.
    pub fn add(&self, exchange: &Arc<Exchange>) -> bool {
        let mut state = self.state.lock();
        let first = state.exchanges.is_empty();
        state.exchanges.push_back(Arc::downgrade(exchange));
        state.listener = None;
        trace!(id = %self.id, ?exchange, first, "exchange added");
        first
    }

    /// An exchange of this conversation has fully completed.
    pub(crate) fn complete(&self, exchange: &Exchange) {
        let callbacks = {
            let mut state = self.state.lock();
            trace!(id = %self.id, ?exchange, "exchange completed");
            state.settle()
        };
        self.run(callbacks);
    }

    fn run(&self, callbacks: Option<Vec<OnComplete>>) {
        if let Some(callbacks) = callbacks {
            debug!(id = %self.id, "conversation complete");
            for callback in callbacks {
                callback(self);
            }
        }
    }

    /// Returns `true` once the terminal exchange has completed.
    pub fn is_complete(&self) -> bool {
        self.state.lock().completed
    }

    /// Abort every live exchange in this conversation.
    ///
    /// Any staged listener is dropped first so no new exchange joins mid-drain.
    /// Returns `true` if any exchange was aborted.
    pub fn abort(&self, cause: Error) -> bool {
        let exchanges = {
            let mut state = self.state.lock();
            state.listener = None;
            state
                .exchanges
                .iter()
                .filter_map(Weak::upgrade)
                .collect::<Vec<_>>()
        };

        let mut aborted = false;
        for exchange in exchanges {
            aborted |= exchange.abort(cause.clone());
        }

        let callbacks = self.state.lock().settle();
        self.run(callbacks);
        aborted
    }
}
