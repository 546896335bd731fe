//! Per-attempt execution state: one translated request context, one byte
//! channel, and the single-assignment future the caller awaits.

use std::sync::{Arc, Mutex, Weak};

use http::header::{self, HeaderValue};
use http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::TransportError;
use crate::loopback::body::ByteStream;
use crate::loopback::context::{RequestContext, ResponseHandle, ResponseHead};
use crate::loopback::request::OutgoingRequest;
use crate::loopback::response::ResponseEnvelope;

pub(crate) type ResponseReceiver = oneshot::Receiver<Result<ResponseEnvelope, TransportError>>;

pub(crate) struct RequestState {
    head: Arc<Mutex<ResponseHead>>,
    stream: ByteStream,
    response_tx: Mutex<Option<oneshot::Sender<Result<ResponseEnvelope, TransportError>>>>,
}

impl RequestState {
    /// Seed a request context from the outgoing request and bind it to a
    /// fresh byte channel. The channel's first-write hook resolves the
    /// response future, so the caller unblocks the moment the pipeline
    /// commits to a body.
    pub(crate) fn new(
        request: &OutgoingRequest,
        cancel: CancellationToken,
    ) -> (Arc<Self>, RequestContext, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let head = Arc::new(Mutex::new(ResponseHead {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }));

        let state = Arc::new_cyclic(|weak: &Weak<RequestState>| {
            let hook_state = weak.clone();
            let stream = ByteStream::new(Box::new(move || {
                if let Some(state) = hook_state.upgrade() {
                    state.complete_response();
                }
            }));
            RequestState {
                head: head.clone(),
                stream,
                response_tx: Mutex::new(Some(tx)),
            }
        });

        let mut headers = request.headers.clone();
        headers.insert(header::HOST, host_header(&request.url));
        if let Some(body) = &request.body {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        }

        let ctx = RequestContext::new(
            request.version,
            request.url.scheme().to_string(),
            request.method.clone(),
            request.url.path().to_string(),
            request.url.query().unwrap_or("").to_string(),
            headers,
            request.body.clone(),
            cancel,
            ResponseHandle::new(head, state.stream.clone()),
        );

        (state, ctx, rx)
    }

    /// Resolve the response future from the current status and headers.
    /// Idempotent; later calls are no-ops. The oneshot wakes the awaiting
    /// caller instead of running its continuation inline, so the write that
    /// triggered completion cannot deadlock on its own waiter.
    pub(crate) fn complete_response(&self) {
        let Some(tx) = self.response_tx.lock().unwrap().take() else {
            return;
        };
        // Header finalization is "first byte written or explicit completion":
        // make sure the hook cannot fire again after this point.
        self.stream.disarm_first_write_hook();

        let (status, headers) = {
            let head = self.head.lock().unwrap();
            (head.status, head.headers.clone())
        };
        let envelope = ResponseEnvelope::new(status, headers, self.stream.reader());
        let _ = tx.send(Ok(envelope));
    }

    /// Fail the channel and, if still unresolved, the response future.
    pub(crate) fn abort(&self, cause: TransportError) {
        log::debug!("request aborted: {cause}");
        self.stream.abort(cause.clone());
        if let Some(tx) = self.response_tx.lock().unwrap().take() {
            let _ = tx.send(Err(cause));
        }
    }

    /// Close the writer side once the pipeline invocation has finished.
    /// Readers drain whatever is buffered and then see EOF. The caller's
    /// request body is owned by the caller and is not touched here.
    pub(crate) fn dispose(&self) {
        self.stream.close();
    }
}

fn host_header(url: &Url) -> HeaderValue {
    let host = url.host_str().unwrap_or_default();
    // `Url::port()` is None for the scheme's default port, which is exactly
    // the case where the Host header omits it.
    let value = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
