use http::{HeaderMap, StatusCode};

use crate::loopback::body::ResponseBody;

/// A response whose body reads live from the channel the pipeline is still
/// writing into. Status and headers are final; body bytes may still be
/// arriving when this is handed to the caller.
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ResponseBody,
}

impl std::fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ResponseEnvelope {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Borrow the streaming body reader.
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Take the streaming body reader, discarding status and headers.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Drain the body to completion and return it as one buffer.
    pub async fn bytes(self) -> std::io::Result<bytes::Bytes> {
        self.body.bytes().await
    }

    /// Drain the body to completion and interpret it as UTF-8.
    pub async fn text(self) -> std::io::Result<String> {
        self.body.text().await
    }
}
