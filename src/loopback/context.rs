//! Per-request context handed to the pipeline.
//!
//! This is the explicit, field-per-concern replacement for the string-keyed
//! environment dictionary a server framework would pass around. The pipeline
//! reads the request side and drives the response side through
//! [`ResponseHandle`]: set status and headers, then write body chunks into
//! the channel the caller is reading from.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::loopback::body::ByteStream;

pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// The outgoing side of a request context: response status, headers and the
/// body sink. Cloneable so a pipeline can hand it to helpers.
///
/// Status and headers are snapshotted into the [`ResponseEnvelope`] when the
/// first body byte is written (or the pipeline returns); mutations after that
/// point are not observed by the caller.
///
/// [`ResponseEnvelope`]: crate::loopback::response::ResponseEnvelope
#[derive(Clone)]
pub struct ResponseHandle {
    head: Arc<Mutex<ResponseHead>>,
    body: ByteStream,
}

impl ResponseHandle {
    pub(crate) fn new(head: Arc<Mutex<ResponseHead>>, body: ByteStream) -> Self {
        Self { head, body }
    }

    pub fn set_status(&self, status: StatusCode) {
        self.head.lock().unwrap().status = status;
    }

    /// Insert a header, replacing any previous value.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.head.lock().unwrap().headers.insert(name, value);
    }

    /// Append a header without displacing existing values.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.head.lock().unwrap().headers.append(name, value);
    }

    /// Write a body chunk. The first write (even an empty one) finalizes the
    /// response head and resolves the caller's `send` future.
    pub fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.body.write(data)
    }

    /// Finalize the response head without writing any body bytes.
    pub fn flush(&self) -> Result<(), TransportError> {
        self.body.flush()
    }

    pub(crate) fn snapshot(&self) -> (StatusCode, HeaderMap) {
        let head = self.head.lock().unwrap();
        (head.status, head.headers.clone())
    }
}

/// The translated representation of one request attempt, owned by the
/// pipeline for the duration of its invocation.
pub struct RequestContext {
    pub protocol: Version,
    pub scheme: String,
    pub method: Method,
    pub path: String,
    /// Always empty; kept so mounted sub-pipelines have somewhere to grow.
    pub path_base: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Fires when the caller's send is cancelled.
    pub cancel: CancellationToken,
    response: ResponseHandle,
}

impl RequestContext {
    pub(crate) fn new(
        protocol: Version,
        scheme: String,
        method: Method,
        path: String,
        query: String,
        headers: HeaderMap,
        body: Option<Bytes>,
        cancel: CancellationToken,
        response: ResponseHandle,
    ) -> Self {
        Self {
            protocol,
            scheme,
            method,
            path,
            path_base: String::new(),
            query,
            headers,
            body,
            cancel,
            response,
        }
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    /// Decoded query pairs in document order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// First value of a query parameter, decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v): (Cow<str>, Cow<str>)| v.into_owned())
    }
}
