use std::sync::Arc;

use super::error::Error;
use super::request::Request;
use super::response::Response;

/// The final result of an exchange.
///
/// An outcome is produced once per exchange, at the moment both the request
/// and the response have completed, and never changes afterwards.
#[derive(Debug, Clone)]
pub struct Outcome {
    request: Arc<Request>,
    request_failure: Option<Error>,
    response: Response,
    response_failure: Option<Error>,
}

impl Outcome {
    pub(crate) fn new(
        request: Arc<Request>,
        request_failure: Option<Error>,
        response: Response,
        response_failure: Option<Error>,
    ) -> Self {
        Self {
            request,
            request_failure,
            response,
            response_failure,
        }
    }

    /// The request which was sent.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Why sending the request failed, if it did.
    pub fn request_failure(&self) -> Option<&Error> {
        self.request_failure.as_ref()
    }

    /// The response which was received, as far as it got.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Why receiving the response failed, if it did.
    pub fn response_failure(&self) -> Option<&Error> {
        self.response_failure.as_ref()
    }

    /// The first failure, preferring the request side.
    pub fn failure(&self) -> Option<&Error> {
        self.request_failure().or(self.response_failure())
    }

    /// Returns `true` if both halves completed without failure.
    pub fn is_succeeded(&self) -> bool {
        self.failure().is_none()
    }

    /// Returns `true` if either half failed.
    pub fn is_failed(&self) -> bool {
        !self.is_succeeded()
    }

    /// Replace the response failure, keeping everything else.
    pub(crate) fn with_response_failure(mut self, failure: Error) -> Self {
        self.response_failure = Some(failure);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_failures() {
        let request: Arc<Request> = Arc::new("http://example.com".parse().unwrap());
        let response = Response::new(request.id());

        let outcome = Outcome::new(request.clone(), None, response.clone(), None);
        assert!(outcome.is_succeeded());
        assert!(outcome.failure().is_none());

        let outcome = outcome.with_response_failure(Error::IdleTimeout);
        assert!(outcome.is_failed());
        assert!(matches!(outcome.failure(), Some(Error::IdleTimeout)));

        let outcome = Outcome::new(
            request,
            Some(Error::aborted("first")),
            response,
            Some(Error::IdleTimeout),
        );
        assert!(matches!(outcome.failure(), Some(Error::Aborted(_))));
    }
}
