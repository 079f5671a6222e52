pub mod exchange;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use crate::error::PublishError;

/// An outbound HTTP request as produced by the protocol adapter and carried
/// through authentication and dispatch.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a header, replacing any previous value. Invalid names/values are
    /// reported as `InvalidRequest` rather than panicking.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), PublishError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PublishError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PublishError::InvalidRequest(format!("header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Body bytes, or the empty slice when there is no body.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Exactly one outcome is produced per submitted request.
#[derive(Debug)]
pub enum Outcome {
    Response(HttpResponse),
    Failure(PublishError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest::new(Method::POST, Url::parse("https://example.com/events").unwrap())
    }

    #[test]
    fn set_header_replaces_previous_value() {
        let mut req = request();
        req.set_header("x-trace", "a").unwrap();
        req.set_header("x-trace", "b").unwrap();
        assert_eq!(req.headers.get("x-trace").unwrap(), "b");
    }

    #[test]
    fn set_header_rejects_invalid_name() {
        let mut req = request();
        assert!(req.set_header("bad header", "v").is_err());
    }

    #[test]
    fn body_bytes_defaults_to_empty() {
        assert!(request().body_bytes().is_empty());
        assert_eq!(request().with_body(b"x".to_vec()).body_bytes(), b"x");
    }
}
