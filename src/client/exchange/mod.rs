//! Exchanges pair one request with one response over one connection attempt.
//!
//! The request and the response complete independently, in either order and
//! possibly at the same time on different threads. An exchange reconciles the two
//! into a single [`Outcome`] without taking a lock: the completion code is a small
//! integer updated with a compare-and-swap loop, and each half's failure is claimed
//! with a compare-and-set before its completion bits are published. Whichever call
//! publishes the last missing bit is the only one which observes the transition,
//! and so is the only one which builds the outcome and tells the conversation.
//!
//! Collaborators which do the actual I/O ([`Sender`](super::Sender) and
//! [`Receiver`](super::Receiver)) report back through [`Exchange::request_complete`]
//! and [`Exchange::response_complete`], or through the helpers
//! ([`Exchange::request_succeeded`], [`Exchange::response_failed`], ...) which also
//! notify the response listeners.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use self::code::{Code, Half};
use self::termination::Termination;
use super::connection::{Connection, ConnectionRef};
use super::conversation::Conversation;
use super::destination::Destination;
use super::error::Error;
use super::listener::Listeners;
use super::outcome::Outcome;
use super::request::Request;
use super::response::Response;
use super::weakopt::WeakOpt;

mod code;
mod termination;

static IDENT: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExchangeId(u64);

impl ExchangeId {
    fn new() -> Self {
        Self(IDENT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// The recorded completion of one half.
#[derive(Debug)]
struct Claim(Option<Error>);

/// What a completion call did.
///
/// `modified` is `true` only for the call which actually completed its half.
/// `outcome` is present only for the call which completed the exchange as a
/// whole, so exactly one caller ever sees it.
#[derive(Debug)]
#[must_use]
pub struct Completion {
    /// The outcome of the exchange, if this call completed it.
    pub outcome: Option<Outcome>,

    /// Whether this call changed the completion state.
    pub modified: bool,
}

impl Completion {
    fn unmodified() -> Self {
        Self {
            outcome: None,
            modified: false,
        }
    }
}

/// One request/response attempt bound to (at most) one connection.
pub struct Exchange {
    id: ExchangeId,
    conversation: Arc<Conversation>,
    destination: WeakOpt<Destination>,
    request: Arc<Request>,
    response: Mutex<Response>,
    listeners: Listeners,
    code: Code,
    request_claim: ArcSwapOption<Claim>,
    response_claim: ArcSwapOption<Claim>,
    abort: ArcSwapOption<Error>,
    dispatching: AtomicBool,
    connection: Mutex<WeakOpt<ConnectionRef>>,
    termination: Termination,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exchange@{} status={}", self.id, self.code.load())
    }
}

impl Exchange {
    /// Create an exchange for `request` within `conversation`.
    ///
    /// The exchange is not yet part of the conversation; whoever admits it into the
    /// flow (a connection binding it, or a destination queueing it) appends it.
    pub fn new(
        conversation: Arc<Conversation>,
        destination: Option<&Arc<Destination>>,
        request: Request,
        listeners: impl Into<Listeners>,
    ) -> Arc<Self> {
        let response = Response::new(request.id());
        Arc::new(Self {
            id: ExchangeId::new(),
            conversation,
            destination: destination.map(WeakOpt::downgrade).unwrap_or_default(),
            request: Arc::new(request),
            response: Mutex::new(response),
            listeners: listeners.into(),
            code: Code::default(),
            request_claim: ArcSwapOption::empty(),
            response_claim: ArcSwapOption::empty(),
            abort: ArcSwapOption::empty(),
            dispatching: AtomicBool::new(false),
            connection: Mutex::new(WeakOpt::none()),
            termination: Termination::new(2),
        })
    }

    /// The conversation this exchange belongs to.
    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    /// The request being sent.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response accumulator.
    ///
    /// Receivers fill it in as the response arrives. Don't hold the guard while
    /// completing the exchange.
    pub fn response(&self) -> MutexGuard<'_, Response> {
        self.response.lock()
    }

    /// The listeners attached to this exchange.
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Why the request failed, once it has completed.
    pub fn request_failure(&self) -> Option<Error> {
        Self::failure(&self.request_claim)
    }

    /// Why the response failed, once it has completed.
    pub fn response_failure(&self) -> Option<Error> {
        Self::failure(&self.response_claim)
    }

    fn failure(claim: &ArcSwapOption<Claim>) -> Option<Error> {
        claim.load_full().and_then(|claim| claim.0.clone())
    }

    /// The first cause passed to [`Exchange::abort`], if any.
    pub fn abort_cause(&self) -> Option<Error> {
        self.abort.load_full().map(|cause| (*cause).clone())
    }

    /// Returns `true` once both the request and the response have completed.
    pub fn is_complete(&self) -> bool {
        self.code.load().is_complete()
    }

    /// Returns `true` once both halves have completed successfully.
    pub fn is_succeeded(&self) -> bool {
        self.code.load().is_succeeded()
    }

    /// Returns `true` if this exchange is currently bound to a live connection.
    pub fn is_bound(&self) -> bool {
        self.connection.lock().upgrade().is_some()
    }

    /// Record the completion of the request.
    pub fn request_complete(&self, failure: Option<Error>) -> Completion {
        self.complete(Half::Request, failure)
    }

    /// Record the completion of the response.
    ///
    /// A failed response tells the connection not to proceed with the request
    /// body, since nobody will read it.
    pub fn response_complete(&self, failure: Option<Error>) -> Completion {
        if failure.is_some() {
            self.proceed(false);
        }
        self.complete(Half::Response, failure)
    }

    fn claim(&self, half: Half) -> &ArcSwapOption<Claim> {
        match half {
            Half::Request => &self.request_claim,
            Half::Response => &self.response_claim,
        }
    }

    fn complete(&self, half: Half, failure: Option<Error>) -> Completion {
        let bits = half.bits(failure.is_none());
        let claim = Arc::new(Claim(failure));
        loop {
            if self.code.load().intersects(bits) {
                trace!(exchange = ?self, %half, "already completed");
                return Completion::unmodified();
            }

            // The cause is published before the code, so whoever sees the bits sees the cause.
            let previous = self
                .claim(half)
                .compare_and_swap(&None::<Arc<Claim>>, Some(claim.clone()));
            if previous.is_none() {
                break;
            }
            drop(previous);

            // A claim without its bits is a completion in flight, or a reset which
            // has cleared the bits but not yet the claim. Either settles shortly.
            std::hint::spin_loop();
        }

        let Some(status) = self.code.set(bits) else {
            trace!(exchange = ?self, %half, "completion raced with another completion");
            let _ = self
                .claim(half)
                .compare_and_swap(&Some(claim), None::<Arc<Claim>>);
            return Completion::unmodified();
        };
        trace!(exchange = ?self, %half, "updated");

        if !status.is_complete() {
            return Completion {
                outcome: None,
                modified: true,
            };
        }

        debug!(exchange = ?self, "complete");
        let outcome = self.outcome();
        self.disassociate();
        self.conversation.complete(self);

        Completion {
            outcome: Some(outcome),
            modified: true,
        }
    }

    fn outcome(&self) -> Outcome {
        Outcome::new(
            self.request.clone(),
            self.request_failure(),
            self.response.lock().clone(),
            self.response_failure(),
        )
    }

    /// Re-arm the response half so a second response can be received.
    ///
    /// `succeeded` must match how the first response completed. Returns `false`
    /// if the response had not completed that way, or if the exchange already
    /// produced its outcome.
    pub fn reset_response(&self, succeeded: bool) -> bool {
        if !self.code.clear(Half::Response, succeeded) {
            debug!(exchange = ?self, succeeded, "response not reset");
            return false;
        }

        // No new response can claim the half until the old claim is gone.
        self.response.lock().reset();
        self.response_claim.store(None);
        trace!(exchange = ?self, "response reset");
        true
    }

    /// Abort this exchange.
    ///
    /// An exchange still waiting in its destination's queue is removed and failed
    /// immediately. A bound exchange is cancelled through its connection, and one
    /// on its way to a connection is cancelled when the connection starts it. An
    /// exchange which was never admitted anywhere is failed directly. An exchange
    /// which has already completed can't be aborted, and `false` is returned.
    pub fn abort(self: &Arc<Self>, cause: Error) -> bool {
        let _ = self
            .abort
            .compare_and_swap(&None::<Arc<Error>>, Some(Arc::new(cause.clone())));

        if let Some(destination) = self.destination.upgrade() {
            if destination.remove(self) {
                destination.abort(self, cause.clone());
                debug!(exchange = ?self, %cause, "aborted while queued");
                return true;
            }
        }

        if let Some(connection) = self.connection() {
            return self.abort_bound(connection, &cause);
        }

        if self.is_complete() {
            trace!(exchange = ?self, "abort too late");
            return false;
        }

        if self.dispatching.load(Ordering::SeqCst) {
            // Starting the exchange observes the recorded cause.
            debug!(exchange = ?self, %cause, "aborted while dispatching");
            return true;
        }

        // Dispatch may have finished binding between the checks above.
        if let Some(connection) = self.connection() {
            return self.abort_bound(connection, &cause);
        }

        let aborted = self.fail(cause.clone());
        self.terminate_request();
        self.terminate_response();
        debug!(exchange = ?self, aborted, %cause, "aborted before admission");
        aborted
    }

    fn abort_bound(self: &Arc<Self>, connection: Connection, cause: &Error) -> bool {
        let aborted = connection.abort_exchange(self, cause);
        debug!(exchange = ?self, aborted, %cause, "aborted while active");
        aborted
    }

    /// Mark the exchange as claimed by a connection which has not started it yet.
    pub(crate) fn set_dispatching(&self, dispatching: bool) {
        self.dispatching.store(dispatching, Ordering::SeqCst);
    }

    /// Tell the connection whether to keep sending the request body.
    pub fn proceed(&self, proceed: bool) {
        if let Some(connection) = self.connection() {
            connection.proceed(proceed);
        }
    }

    pub(crate) fn associate(&self, connection: &Arc<ConnectionRef>) {
        *self.connection.lock() = WeakOpt::downgrade(connection);
    }

    /// Clear the connection back-reference and free the connection's slot.
    fn disassociate(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            Connection::from_ref(connection).release(self);
        }
    }

    fn connection(&self) -> Option<Connection> {
        self.connection.lock().upgrade().map(Connection::from_ref)
    }

    /// Drive the connection's receiver for this exchange, as when response data is readable.
    pub fn receive(self: &Arc<Self>) {
        match self.connection() {
            Some(connection) => connection.receiver().receive(self.clone()),
            None => debug!(exchange = ?self, "receive without a connection"),
        }
    }

    /// The connection was idle for too long.
    pub fn idle_timeout(self: &Arc<Self>) {
        match self.connection() {
            Some(connection) => connection.receiver().idle_timeout(self),
            None => trace!(exchange = ?self, "idle timeout without a connection"),
        }
    }

    /// Signal that the request side has finished all of its processing.
    pub fn terminate_request(&self) {
        trace!(exchange = ?self, "request terminated");
        self.termination.signal();
    }

    /// Signal that the response side has finished all of its processing.
    pub fn terminate_response(&self) {
        trace!(exchange = ?self, "response terminated");
        self.termination.signal();
    }

    /// Returns `true` once both sides have terminated.
    pub fn is_terminated(&self) -> bool {
        self.termination.is_released()
    }

    /// Block the current thread until both sides have terminated.
    ///
    /// This must not be called from a sender, receiver or listener callback for
    /// this exchange, since those are where the termination signals come from.
    pub fn await_termination(&self) {
        self.termination.wait();
    }

    /// Like [`Exchange::await_termination`], but gives up after `timeout`.
    ///
    /// Returns `true` if both sides terminated in time.
    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        self.termination.wait_for(timeout)
    }
}

impl Exchange {
    /// Report that the status line and headers of the response were received.
    pub fn response_headers(&self) {
        let response = self.response.lock().clone();
        self.listeners.notify_headers(&response);
    }

    /// Complete the request successfully, notifying listeners if the exchange finished.
    pub fn request_succeeded(&self) -> bool {
        self.finish_request(None)
    }

    /// Fail the request, notifying listeners if the exchange finished.
    pub fn request_failed(&self, failure: Error) -> bool {
        self.finish_request(Some(failure))
    }

    fn finish_request(&self, failure: Option<Error>) -> bool {
        let completion = self.request_complete(failure);
        if let Some(outcome) = &completion.outcome {
            self.listeners.notify_complete(outcome);
        }
        completion.modified
    }

    /// Complete the response successfully and notify listeners.
    pub fn response_succeeded(&self) -> bool {
        let completion = self.response_complete(None);
        if !completion.modified {
            return false;
        }

        let response = self.response.lock().clone();
        self.listeners.notify_success(&response);
        if let Some(outcome) = &completion.outcome {
            self.listeners.notify_complete(outcome);
        }
        true
    }

    /// Fail the response and notify listeners.
    pub fn response_failed(&self, failure: Error) -> bool {
        let completion = self.response_complete(Some(failure.clone()));
        if !completion.modified {
            return false;
        }

        let response = self.response.lock().clone();
        self.listeners.notify_failure(&response, &failure);
        if let Some(outcome) = &completion.outcome {
            self.listeners.notify_complete(outcome);
        }
        true
    }

    /// Fail both halves with `cause`.
    ///
    /// Returns `true` if either half was still pending.
    pub fn fail(&self, cause: Error) -> bool {
        let request = self.request_failed(cause.clone());
        let response = self.response_failed(cause);
        request || response
    }
}
