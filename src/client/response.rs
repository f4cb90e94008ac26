//! The response accumulator owned by each exchange.

use http::{HeaderMap, HeaderValue, StatusCode, Version};

use super::request::RequestId;

/// Response state collected by a [`Receiver`](super::Receiver).
///
/// The receiver fills in the status line and headers as they are parsed;
/// listeners read them when notified.
#[derive(Debug, Clone)]
pub struct Response {
    request: RequestId,
    version: Version,
    status: StatusCode,
    headers: HeaderMap,
}

impl Response {
    pub(crate) fn new(request: RequestId) -> Self {
        Self {
            request,
            version: Version::HTTP_11,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    /// Identifier of the request this response answers.
    pub fn request_id(&self) -> RequestId {
        self.request
    }

    /// Protocol version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the protocol version of the response.
    pub fn set_version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the response status.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The `Location` header, when it is present and valid UTF-8.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(http::header::LOCATION)
            .and_then(|value: &HeaderValue| value.to_str().ok())
    }

    /// Clear the accumulated status and headers so a second response can be collected.
    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
    }
}
