//! Requests submitted to a [`Client`](super::Client).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::uri::Scheme;
use http::{HeaderMap, Method, Uri, Version};

use super::error::UriError;

static IDENT: AtomicU64 = AtomicU64::new(1);

/// Identifier shared by every request in a single conversation.
///
/// Redirect follow-ups reuse the identifier of the request which started the chain,
/// which is how the client finds the conversation they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(IDENT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Request body content.
///
/// Content either knows its length up front, in which case the request is
/// sent with a `Content-Length`, or it is streamed in chunks of unknown total
/// length and sent with chunked transfer encoding.
#[derive(Debug, Clone)]
pub enum Content {
    /// Content with a known length.
    Sized(Bytes),

    /// Content streamed in chunks whose total length is not known in advance.
    Chunked(Vec<Bytes>),
}

impl Content {
    /// The length of the content, if it is known.
    pub fn length(&self) -> Option<u64> {
        match self {
            Content::Sized(bytes) => Some(bytes.len() as u64),
            Content::Chunked(_) => None,
        }
    }

    /// Iterate over the chunks of this content.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        let chunks: &[Bytes] = match self {
            Content::Sized(bytes) => std::slice::from_ref(bytes),
            Content::Chunked(chunks) => chunks,
        };
        chunks.iter()
    }
}

impl From<Bytes> for Content {
    fn from(value: Bytes) -> Self {
        Content::Sized(value)
    }
}

impl From<&'static str> for Content {
    fn from(value: &'static str) -> Self {
        Content::Sized(Bytes::from_static(value.as_bytes()))
    }
}

/// An HTTP request, addressed by its URI parts.
///
/// The request is mutable until it is sent, at which point it is normalized once
/// by the connection (see [`Connection::send`](super::Connection::send)) and frozen
/// inside its exchange.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    method: Method,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    headers: HeaderMap,
    content: Option<Content>,
    version: Version,
}

fn default_port(scheme: &Scheme) -> u16 {
    if scheme == &Scheme::HTTPS || scheme.as_str() == "wss" {
        443
    } else {
        80
    }
}

impl Request {
    /// Create a `GET` request for the given URI with a fresh identifier.
    pub fn new(uri: Uri) -> Result<Self, UriError> {
        Self::with_id(RequestId::new(), uri)
    }

    /// Create a `GET` request for the given URI which belongs to an existing conversation.
    pub fn with_id(id: RequestId, uri: Uri) -> Result<Self, UriError> {
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| UriError::MissingScheme(uri.clone()))?;
        let host = uri
            .host()
            .ok_or_else(|| UriError::MissingHost(uri.clone()))?
            .to_owned();
        let port = uri.port_u16().unwrap_or_else(|| default_port(&scheme));
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_default();

        Ok(Self {
            id,
            method: Method::GET,
            scheme,
            host,
            port,
            path,
            headers: HeaderMap::new(),
            content: None,
            version: Version::HTTP_11,
        })
    }

    /// Conversation identifier for this request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Set the request method.
    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// URI scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Host the request is addressed to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the request is addressed to, defaulted from the scheme when absent from the URI.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path and query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the path and query.
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Request content, if any.
    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    /// Set the request content.
    pub fn set_content(&mut self, content: impl Into<Content>) -> &mut Self {
        self.content = Some(content.into());
        self
    }

    /// Protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the protocol version.
    pub fn set_version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Reassemble the full URI for this request.
    pub fn uri(&self) -> Result<Uri, UriError> {
        let path = if self.path.trim().is_empty() {
            "/"
        } else {
            self.path.as_str()
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(format!("{}:{}", self.host, self.port))
            .path_and_query(path)
            .build()
            .map_err(|error| UriError::InvalidParts(error.to_string().into()))
    }
}

impl FromStr for Request {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = Uri::from_str(s)?;
        Request::new(uri)
    }
}
