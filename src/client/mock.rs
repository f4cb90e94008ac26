//! Recording senders and receivers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;

use super::connection::{Receiver, Sender};
use super::error::Error;
use super::exchange::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Manual,
    Auto,
}

/// A sender which records what it was asked to do.
///
/// In manual mode nothing is written; the test drives completion itself. In
/// auto mode every request completes successfully as soon as it is sent.
#[derive(Debug)]
pub(crate) struct MockSender {
    mode: Mode,
    sent: AtomicUsize,
    aborted: AtomicUsize,
    proceeds: Mutex<Vec<bool>>,
}

impl MockSender {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            sent: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            proceeds: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn manual() -> Self {
        Self::new(Mode::Manual)
    }

    pub(crate) fn auto() -> Self {
        Self::new(Mode::Auto)
    }

    pub(crate) fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub(crate) fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn proceeds(&self) -> Vec<bool> {
        self.proceeds.lock().clone()
    }
}

impl Sender for MockSender {
    fn send(&self, exchange: Arc<Exchange>) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.mode == Mode::Auto {
            exchange.request_succeeded();
            exchange.terminate_request();
        }
    }

    fn proceed(&self, _exchange: &Arc<Exchange>, proceed: bool) {
        self.proceeds.lock().push(proceed);
    }

    fn abort(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        if exchange.request_failed(cause.clone()) {
            exchange.terminate_request();
            true
        } else {
            false
        }
    }
}

/// A receiver which records what it was asked to do.
///
/// In auto mode each `receive` produces a complete response with the configured status.
#[derive(Debug)]
pub(crate) struct MockReceiver {
    mode: Mode,
    status: StatusCode,
    received: AtomicUsize,
    aborted: AtomicUsize,
    timeouts: AtomicUsize,
}

impl MockReceiver {
    fn new(mode: Mode, status: StatusCode) -> Self {
        Self {
            mode,
            status,
            received: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn manual() -> Self {
        Self::new(Mode::Manual, StatusCode::OK)
    }

    pub(crate) fn auto(status: StatusCode) -> Self {
        Self::new(Mode::Auto, status)
    }

    pub(crate) fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub(crate) fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }
}

impl Receiver for MockReceiver {
    fn receive(&self, exchange: Arc<Exchange>) {
        self.received.fetch_add(1, Ordering::SeqCst);
        if self.mode == Mode::Auto {
            exchange.response().set_status(self.status);
            exchange.response_headers();
            exchange.response_succeeded();
            exchange.terminate_response();
        }
    }

    fn idle_timeout(&self, exchange: &Arc<Exchange>) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
        exchange.abort(Error::IdleTimeout);
    }

    fn abort(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        if exchange.response_failed(cause.clone()) {
            exchange.terminate_response();
            true
        } else {
            false
        }
    }
}
