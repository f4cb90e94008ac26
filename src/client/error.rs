use std::sync::Arc;

use thiserror::Error;

use crate::BoxError;

/// Client error type.
///
/// Errors are shared between an [`Exchange`](super::Exchange) and every
/// [`Outcome`](super::Outcome) which reports them, so they are cheap to clone.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A second request was sent on a connection which still has an exchange bound.
    #[error("pipelined requests are not supported")]
    Pipelining,

    /// Data arrived on a connection which has no exchange bound to it.
    #[error("no exchange bound to the connection")]
    NoExchange,

    /// The connection was idle for too long while an exchange was bound.
    #[error("idle timeout")]
    IdleTimeout,

    /// The exchange was aborted.
    #[error("aborted: {0}")]
    Aborted(Arc<str>),

    /// Error occured with the underlying transport.
    #[error("transport: {0}")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The redirect chain exceeded the configured number of hops.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    /// A redirect response carried a location which can't be followed.
    #[error("invalid redirect location: {0:?}")]
    InvalidLocation(Arc<str>),

    /// The request URI is not usable for an exchange.
    #[error(transparent)]
    InvalidUri(#[from] UriError),

    /// The result handle was released without an outcome.
    #[error("request canceled")]
    Canceled,

    /// The client or destination needed for this operation is gone.
    #[error("client closed")]
    Closed,
}

impl Error {
    /// Create an abort error with the given reason.
    pub fn aborted(reason: impl Into<Arc<str>>) -> Self {
        Error::Aborted(reason.into())
    }

    /// Wrap an arbitrary transport error.
    pub fn transport(error: impl Into<BoxError>) -> Self {
        Error::Transport(Arc::from(error.into()))
    }

    /// Returns `true` if this error came from an abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

/// The URI used for a request is invalid.
///
/// Usually, this means that the URI is missing a scheme or host,
/// but it can also mean that the string could not be parsed.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum UriError {
    /// The URI string could not be parsed.
    #[error("invalid uri: {0}")]
    InvalidUri(Arc<str>),

    /// The URI parts could not be assembled.
    #[error("invalid uri parts: {0}")]
    InvalidParts(Arc<str>),

    /// The URI is missing a scheme.
    #[error("missing scheme in uri: {0}")]
    MissingScheme(http::Uri),

    /// The URI is missing a host.
    #[error("missing host in uri: {0}")]
    MissingHost(http::Uri),
}

impl From<http::uri::InvalidUri> for UriError {
    fn from(error: http::uri::InvalidUri) -> Self {
        UriError::InvalidUri(error.to_string().into())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Clone, Into<BoxError>);

    #[test]
    fn transport_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let error = Error::transport(io);

        assert_eq!(error.to_string(), "transport: reset");
        let source = std::error::Error::source(&error).expect("source");
        assert_eq!(source.to_string(), "reset");
    }

    #[test]
    fn aborted() {
        let error = Error::aborted("user");
        assert!(error.is_aborted());
        assert_eq!(error.to_string(), "aborted: user");
        assert!(!Error::Pipelining.is_aborted());
    }
}
