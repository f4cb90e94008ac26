//! Request normalization, applied once before a request is sent.
//!
//! Every rule only fills in what is missing, so normalizing twice is harmless.

use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderValue, Version};

use crate::client::request::Request;

/// Fill in the path, framing headers, `Host` and `User-Agent` of `request`.
pub(crate) fn normalize_request(request: &mut Request, user_agent: Option<&HeaderValue>) {
    if request.path().trim().is_empty() {
        request.set_path("/");
    }

    let length = request.content().map(|content| content.length());
    let headers = request.headers_mut();
    match length {
        Some(Some(length)) if !headers.contains_key(CONTENT_LENGTH) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Some(None) if !headers.contains_key(TRANSFER_ENCODING) => {
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        _ => {}
    }

    if let Some(user_agent) = user_agent {
        if !request.headers().contains_key(USER_AGENT) {
            request.headers_mut().insert(USER_AGENT, user_agent.clone());
        }
    }

    if request.version() >= Version::HTTP_11 && !request.headers().contains_key(HOST) {
        let authority = format!("{}:{}", request.host(), request.port());
        match HeaderValue::from_str(&authority) {
            Ok(value) => {
                tracing::trace!(host = %authority, "setting host header");
                request.headers_mut().insert(HOST, value);
            }
            Err(_) => tracing::warn!(host = %authority, "host is not a valid header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::client::request::Content;

    fn request() -> Request {
        "http://example.com:8080/".parse().unwrap()
    }

    #[test]
    fn blank_path_and_known_length() {
        let mut request = request();
        request.set_path("").set_content(Bytes::from_static(b"0123456789"));

        normalize_request(&mut request, None);

        assert_eq!(request.path(), "/");
        assert_eq!(request.headers().get(CONTENT_LENGTH).unwrap(), "10");
        assert_eq!(request.headers().get(HOST).unwrap(), "example.com:8080");
        assert!(request.headers().get(TRANSFER_ENCODING).is_none());
        assert!(request.headers().get(USER_AGENT).is_none());
    }

    #[test]
    fn unknown_length_is_chunked() {
        let mut request = request();
        request.set_content(Content::Chunked(vec![Bytes::from_static(b"abc")]));

        normalize_request(&mut request, None);

        assert_eq!(request.headers().get(TRANSFER_ENCODING).unwrap(), "chunked");
        assert!(request.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn existing_headers_are_kept() {
        let mut request = request();
        request.set_content(Content::Chunked(Vec::new()));
        request
            .headers_mut()
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("example.org"));
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("curl/8"));

        normalize_request(&mut request, Some(&HeaderValue::from_static("parley/test")));
        normalize_request(&mut request, Some(&HeaderValue::from_static("parley/test")));

        assert_eq!(
            request.headers().get(TRANSFER_ENCODING).unwrap(),
            "gzip, chunked"
        );
        assert_eq!(request.headers().get(HOST).unwrap(), "example.org");
        assert_eq!(request.headers().get(USER_AGENT).unwrap(), "curl/8");
        assert_eq!(request.headers().len(), 3);
    }

    #[test]
    fn http10_has_no_host() {
        let mut request = request();
        request.set_version(Version::HTTP_10);

        normalize_request(&mut request, Some(&HeaderValue::from_static("parley/test")));

        assert!(request.headers().get(HOST).is_none());
        assert_eq!(request.headers().get(USER_AGENT).unwrap(), "parley/test");
    }
}
