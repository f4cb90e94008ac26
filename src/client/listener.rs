//! Response listeners and the notifier which drives them.

use std::fmt;
use std::sync::Arc;

use super::error::Error;
use super::outcome::Outcome;
use super::response::Response;

/// Observes the progress of a response.
///
/// Listeners are called on whichever thread completed the relevant half of the
/// exchange, so they must be cheap and must not block. All methods default to
/// doing nothing.
pub trait ResponseListener: Send + Sync + 'static {
    /// The status line and headers have been received.
    fn on_headers(&self, response: &Response) {
        let _ = response;
    }

    /// The response was received completely.
    fn on_success(&self, response: &Response) {
        let _ = response;
    }

    /// Receiving the response failed.
    fn on_failure(&self, response: &Response, failure: &Error) {
        let _ = (response, failure);
    }

    /// Both the request and the response have completed.
    fn on_complete(&self, outcome: &Outcome) {
        let _ = outcome;
    }
}

/// The listeners attached to a single exchange.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Vec<Arc<dyn ResponseListener>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Listeners {
    /// Create an empty set of listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn push(&mut self, listener: Arc<dyn ResponseListener>) {
        self.inner.push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over the listeners.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResponseListener>> {
        self.inner.iter()
    }

    pub(crate) fn notify_headers(&self, response: &Response) {
        tracing::trace!(status = %response.status(), "notify headers");
        for listener in &self.inner {
            listener.on_headers(response);
        }
    }

    pub(crate) fn notify_success(&self, response: &Response) {
        tracing::trace!(status = %response.status(), "notify success");
        for listener in &self.inner {
            listener.on_success(response);
        }
    }

    pub(crate) fn notify_failure(&self, response: &Response, failure: &Error) {
        tracing::trace!(%failure, "notify failure");
        for listener in &self.inner {
            listener.on_failure(response, failure);
        }
    }

    pub(crate) fn notify_complete(&self, outcome: &Outcome) {
        tracing::trace!(succeeded = outcome.is_succeeded(), "notify complete");
        for listener in &self.inner {
            listener.on_complete(outcome);
        }
    }
}

impl From<Vec<Arc<dyn ResponseListener>>> for Listeners {
    fn from(inner: Vec<Arc<dyn ResponseListener>>) -> Self {
        Self { inner }
    }
}

impl From<Arc<dyn ResponseListener>> for Listeners {
    fn from(listener: Arc<dyn ResponseListener>) -> Self {
        Self {
            inner: vec![listener],
        }
    }
}

impl FromIterator<Arc<dyn ResponseListener>> for Listeners {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ResponseListener>>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
