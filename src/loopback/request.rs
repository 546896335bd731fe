use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Version};
use url::Url;

/// An outgoing request, owned by the caller for its whole lifetime.
///
/// `send` mutates the request in place while following redirects: the URL and
/// method are rewritten per hop and the `Authorization` header is stripped, so
/// after the call returns the struct reflects the final hop.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Request body, if any. `Bytes` is cheaply cloneable, so the same body
    /// can be replayed across redirect attempts.
    pub body: Option<Bytes>,
    pub version: Version,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            version: Version::HTTP_11,
        }
    }

    /// Convenience constructor for a GET request from a URL string.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    /// Convenience constructor for a POST request from a URL string.
    pub fn post(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::POST, Url::parse(url)?))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}
