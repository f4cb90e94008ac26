//! Following `302 Found` and `303 See Other` within one conversation.
//!
//! A [`RedirectListener`] decides what to do as soon as the status line and
//! headers of a response arrive. When it will follow, it stages the listener for
//! the next hop into the conversation right away, so the conversation can't
//! complete in the gap between this response finishing and the follow-up being
//! submitted. The downstream listeners only ever see the last response in the
//! chain.
//!
//! `301 Moved Permanently` is passed through untouched, as are all other statuses.

use std::fmt;
use std::sync::Arc;

use http::{StatusCode, Uri, Version};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::conversation::Conversation;
use super::error::Error;
use super::listener::{Listeners, ResponseListener};
use super::outcome::Outcome;
use super::request::{Request, RequestId};
use super::response::Response;
use super::weakopt::WeakOpt;
use super::{Client, ClientRef};

#[derive(Debug)]
enum Hop {
    Undecided,
    Pass,
    Follow(Uri),
    Failed(Error),
}

/// Follows redirects for one hop of a conversation, then hands the chain to the next hop.
pub struct RedirectListener {
    client: WeakOpt<ClientRef>,
    conversation: Arc<Conversation>,
    downstream: Listeners,
    base: Uri,
    version: Version,
    hops: usize,
    limit: usize,
    state: Mutex<Hop>,
}

impl fmt::Debug for RedirectListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectListener")
            .field("conversation", &self.conversation.id())
            .field("base", &self.base)
            .field("hops", &self.hops)
            .field("limit", &self.limit)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl RedirectListener {
    /// Listen for redirects in response to `request`, following at most `limit` hops.
    pub(crate) fn new(
        client: &Client,
        conversation: Arc<Conversation>,
        request: &Request,
        downstream: Listeners,
        limit: usize,
    ) -> Result<Arc<Self>, Error> {
        Ok(Arc::new(Self {
            client: WeakOpt::downgrade(&client.inner),
            conversation,
            downstream,
            base: request.uri()?,
            version: request.version(),
            hops: 0,
            limit,
            state: Mutex::new(Hop::Undecided),
        }))
    }

    fn next_hop(&self, target: Uri) -> Arc<Self> {
        Arc::new(Self {
            client: self.client.clone(),
            conversation: self.conversation.clone(),
            downstream: self.downstream.clone(),
            base: target,
            version: self.version,
            hops: self.hops + 1,
            limit: self.limit,
            state: Mutex::new(Hop::Undecided),
        })
    }

    /// Number of redirects followed before reaching this hop.
    pub fn hops(&self) -> usize {
        self.hops
    }

    fn decide(&self, response: &Response) -> Hop {
        if !matches!(response.status(), StatusCode::FOUND | StatusCode::SEE_OTHER) {
            return Hop::Pass;
        }

        let Some(location) = response.location() else {
            debug!(status = %response.status(), "redirect without a location");
            return Hop::Pass;
        };

        if self.hops >= self.limit {
            debug!(limit = self.limit, "redirect limit reached");
            return Hop::Failed(Error::TooManyRedirects(self.limit));
        }

        match resolve(&self.base, location) {
            Ok(target) => Hop::Follow(target),
            Err(error) => Hop::Failed(error),
        }
    }

    fn submit(&self, target: Uri, id: RequestId) -> Result<(), Error> {
        let client = self
            .client
            .upgrade()
            .map(Client::from_ref)
            .ok_or(Error::Closed)?;

        let mut request = Request::with_id(id, target)?;
        request.set_version(self.version);

        let exchange = client.submit(request, Listeners::new());
        debug!(?exchange, hops = self.hops + 1, "redirect followed");
        Ok(())
    }
}

impl ResponseListener for RedirectListener {
    fn on_headers(&self, response: &Response) {
        let hop = self.decide(response);
        trace!(status = %response.status(), ?hop, "redirect decision");

        match &hop {
            Hop::Follow(target) => {
                let next = self.next_hop(target.clone());
                self.conversation.set_response_listener(Some(next));
            }
            _ => self.downstream.notify_headers(response),
        }

        *self.state.lock() = hop;
    }

    fn on_success(&self, response: &Response) {
        let decision = {
            let state = self.state.lock();
            match &*state {
                Hop::Follow(target) => Ok(target.clone()),
                Hop::Failed(error) => Err(Some(error.clone())),
                Hop::Pass | Hop::Undecided => Err(None),
            }
        };

        let target = match decision {
            Ok(target) => target,
            Err(Some(error)) => {
                self.downstream.notify_failure(response, &error);
                return;
            }
            Err(None) => {
                self.downstream.notify_success(response);
                return;
            }
        };

        if let Err(error) = self.submit(target, response.request_id()) {
            debug!(%error, "redirect could not be submitted");
            *self.state.lock() = Hop::Failed(error.clone());
            self.conversation.set_response_listener(None);
            self.downstream.notify_headers(response);
            self.downstream.notify_failure(response, &error);
        }
    }

    fn on_failure(&self, response: &Response, failure: &Error) {
        let follow = {
            let mut state = self.state.lock();
            let follow = matches!(&*state, Hop::Follow(_));
            *state = Hop::Pass;
            follow
        };

        if follow {
            self.conversation.set_response_listener(None);
            self.downstream.notify_headers(response);
        }
        self.downstream.notify_failure(response, failure);
    }

    fn on_complete(&self, outcome: &Outcome) {
        let failure = match &*self.state.lock() {
            Hop::Follow(target) => {
                trace!(%target, "intermediate outcome suppressed");
                return;
            }
            Hop::Failed(error) if outcome.response_failure().is_none() => Some(error.clone()),
            _ => None,
        };

        match failure {
            Some(failure) => self
                .downstream
                .notify_complete(&outcome.clone().with_response_failure(failure)),
            None => self.downstream.notify_complete(outcome),
        }
    }
}

/// Resolve a `Location` value against the URI of the request which received it.
pub(crate) fn resolve(base: &Uri, location: &str) -> Result<Uri, Error> {
    let invalid = || Error::InvalidLocation(location.into());
    let location = location.trim();

    if location.contains("://") {
        let uri: Uri = location.parse().map_err(|_| invalid())?;
        return match (uri.scheme(), uri.authority()) {
            (Some(_), Some(_)) => Ok(uri),
            _ => Err(invalid()),
        };
    }

    if location.starts_with("//") {
        let scheme = base.scheme_str().ok_or_else(invalid)?;
        return format!("{scheme}:{location}").parse().map_err(|_| invalid());
    }

    let path = if location.starts_with('/') {
        location.to_owned()
    } else {
        let directory = base
            .path()
            .rfind('/')
            .map_or("/", |index| &base.path()[..=index]);
        format!("{directory}{location}")
    };

    let mut parts = http::uri::Parts::default();
    parts.scheme = base.scheme().cloned();
    parts.authority = base.authority().cloned();
    parts.path_and_query = Some(path.parse().map_err(|_| invalid())?);
    Uri::from_parts(parts).map_err(|_| invalid())
}
