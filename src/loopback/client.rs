//! The loopback client: a request/response API over an in-process pipeline.
//!
//! `send` translates an [`OutgoingRequest`] into a [`RequestContext`], runs
//! the pipeline on a background task, and hands back a [`ResponseEnvelope`]
//! as soon as the response head is final. The body keeps streaming through
//! the byte channel while the caller reads it. Cookie persistence and
//! automatic redirect following are layered on top, per the configuration.
//!
//! No socket is involved anywhere; the only communication between the caller
//! and the pipeline task is the byte channel and the response future.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::cookies::{CookieJarHandle, MemoryCookieJar};
use crate::errors::TransportError;
use crate::loopback::request::OutgoingRequest;
use crate::loopback::response::ResponseEnvelope;
use crate::loopback::state::RequestState;
use crate::pipeline::PipelineHandle;

pub struct LoopbackClient {
    pipeline: PipelineHandle,
    config: Mutex<ClientConfig>,
    jar: Mutex<CookieJarHandle>,
    /// Set on the first `send`; configuration is frozen from then on.
    started: AtomicBool,
    disposed: AtomicBool,
}

impl LoopbackClient {
    /// Create a client over `pipeline`. If `config` is `None`,
    /// [`ClientConfig::default`] is used.
    pub fn new(
        pipeline: PipelineHandle,
        config: Option<ClientConfig>,
    ) -> Result<Self, TransportError> {
        let config = config.unwrap_or_default();
        if config.redirect_limit < 1 {
            return Err(TransportError::InvalidRedirectLimit);
        }
        Ok(Self {
            pipeline,
            config: Mutex::new(config),
            jar: Mutex::new(Arc::new(RwLock::new(MemoryCookieJar::new()))),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn set_use_cookies(&self, value: bool) -> Result<(), TransportError> {
        self.check_configurable()?;
        self.config.lock().unwrap().use_cookies = value;
        Ok(())
    }

    pub fn set_follow_redirects(&self, value: bool) -> Result<(), TransportError> {
        self.check_configurable()?;
        self.config.lock().unwrap().follow_redirects = value;
        Ok(())
    }

    pub fn set_redirect_limit(&self, value: usize) -> Result<(), TransportError> {
        self.check_configurable()?;
        if value < 1 {
            return Err(TransportError::InvalidRedirectLimit);
        }
        self.config.lock().unwrap().redirect_limit = value;
        Ok(())
    }

    /// Swap in a different jar, e.g. one shared with another client.
    pub fn set_cookie_jar(&self, jar: CookieJarHandle) -> Result<(), TransportError> {
        self.check_configurable()?;
        *self.jar.lock().unwrap() = jar;
        Ok(())
    }

    /// Handle to the jar this client reads and writes. The jar outlives any
    /// single request; it is never reset between sends.
    pub fn cookie_jar(&self) -> CookieJarHandle {
        self.jar.lock().unwrap().clone()
    }

    /// Mark the client disposed. Every later operation fails with
    /// [`TransportError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Send `request` through the pipeline and return the response as soon as
    /// its head is final; the body streams afterwards.
    ///
    /// The request is mutated in place across redirect hops. Cancelling
    /// `cancel` aborts the in-flight attempt and the whole redirect sequence,
    /// surfacing [`TransportError::Cancelled`].
    pub async fn send(
        &self,
        request: &mut OutgoingRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope, TransportError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::Disposed);
        }
        self.started.store(true, Ordering::SeqCst);

        let config = self.config.lock().unwrap().clone();
        let jar = self.jar.lock().unwrap().clone();

        let request_id = Uuid::new_v4();
        log::debug!(
            "[{request_id}] {} {} (cookies={}, redirects={})",
            request.method,
            request.url,
            config.use_cookies,
            config.follow_redirects
        );

        let mut response = self.send_attempt(request, &config, &jar, &cancel).await?;

        let mut redirects = 0usize;
        while config.follow_redirects && wants_redirect(response.status, &request.method) {
            if redirects >= config.redirect_limit {
                return Err(TransportError::RedirectLimitExceeded(config.redirect_limit));
            }
            let target = redirect_target(&response, &request.url)?;
            log::debug!("[{request_id}] {} redirect -> {target}", response.status);

            if redirect_forces_get(response.status) {
                request.method = Method::GET;
                request.body = None;
            }
            request.url = target;
            request.headers.remove(header::AUTHORIZATION);

            redirects += 1;
            response = self.send_attempt(request, &config, &jar, &cancel).await?;
        }

        Ok(response)
    }

    /// One attempt: cookie injection, pipeline invocation on a background
    /// task, cookie capture. Exactly one pipeline invocation per call.
    async fn send_attempt(
        &self,
        request: &mut OutgoingRequest,
        config: &ClientConfig,
        jar: &CookieJarHandle,
        cancel: &CancellationToken,
    ) -> Result<ResponseEnvelope, TransportError> {
        if config.use_cookies {
            match jar.read().unwrap().get_request_cookies(&request.url) {
                Some(value) => {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        request.headers.insert(header::COOKIE, value);
                    }
                }
                None => {
                    // A hop to another host must not leak the previous Cookie.
                    request.headers.remove(header::COOKIE);
                }
            }
        }

        let (state, ctx, rx) = RequestState::new(request, cancel.child_token());

        // Cancellation registration: aborts the attempt when the signal
        // fires, released once the invocation finishes. The pipeline itself
        // is not awaited on cancel; its next write fails instead.
        let watcher = {
            let state = state.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                state.abort(TransportError::Cancelled);
            })
        };

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            match pipeline.call(ctx).await {
                Ok(()) => state.complete_response(),
                Err(e) => state.abort(TransportError::Pipeline(e.to_string())),
            }
            watcher.abort();
            state.dispose();
        });

        let response = rx.await.map_err(|_| TransportError::Internal)??;

        if config.use_cookies && response.headers.contains_key(header::SET_COOKIE) {
            jar.write()
                .unwrap()
                .store_response_cookies(&request.url, &response.headers);
        }

        Ok(response)
    }

    fn check_configurable(&self) -> Result<(), TransportError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::Disposed);
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(TransportError::ConfigFrozen);
        }
        Ok(())
    }
}

fn redirect_forces_get(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303)
}

fn is_bodyless(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
}

fn wants_redirect(status: StatusCode, method: &Method) -> bool {
    redirect_forces_get(status) || (status.as_u16() == 307 && is_bodyless(method))
}

fn redirect_target(
    response: &ResponseEnvelope,
    base: &Url,
) -> Result<Url, TransportError> {
    response
        .headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        // `join` resolves relative targets and passes absolute ones through.
        .and_then(|loc| base.join(loc).ok())
        .ok_or(TransportError::BadRedirect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::context::RequestContext;
    use std::time::Duration;

    type CallLog = Arc<Mutex<Vec<(Method, String)>>>;

    fn client(pipeline: PipelineHandle, config: ClientConfig) -> LoopbackClient {
        let _ = env_logger::builder().is_test(true).try_init();
        LoopbackClient::new(pipeline, Some(config)).unwrap()
    }

    fn redirect_config() -> ClientConfig {
        ClientConfig {
            follow_redirects: true,
            ..ClientConfig::default()
        }
    }

    /// Pipeline that 302-redirects `/a` to `/b` and answers `/b` with a body.
    fn hop_pipeline(log: CallLog) -> PipelineHandle {
        Arc::new(move |ctx: RequestContext| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push((ctx.method.clone(), ctx.path.clone()));
                if ctx.path == "/a" {
                    ctx.response().set_status(StatusCode::FOUND);
                    ctx.response()
                        .insert_header(header::LOCATION, HeaderValue::from_static("/b"));
                } else {
                    ctx.response().write(b"landed").unwrap();
                }
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn send_streams_pipeline_output() {
        let pipeline: PipelineHandle = Arc::new(|ctx: RequestContext| async move {
            ctx.response()
                .insert_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            ctx.response().write(b"hello from the pipeline")?;
            Ok(())
        });
        let client = client(pipeline, ClientConfig::default());

        let mut request = OutgoingRequest::get("http://localhost/hello").unwrap();
        let response = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.headers.get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(response.text().await.unwrap(), "hello from the pipeline");
    }

    #[tokio::test]
    async fn pipeline_returning_without_writing_yields_empty_200() {
        let pipeline: PipelineHandle =
            Arc::new(|_ctx: RequestContext| async move { Ok(()) });
        let client = client(pipeline, ClientConfig::default());

        let mut request = OutgoingRequest::get("http://localhost/").unwrap();
        let response = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pipeline_error_surfaces_from_send() {
        let pipeline: PipelineHandle = Arc::new(|_ctx: RequestContext| async move {
            anyhow::bail!("index unavailable")
        });
        let client = client(pipeline, ClientConfig::default());

        let mut request = OutgoingRequest::get("http://localhost/").unwrap();
        let err = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            TransportError::Pipeline(msg) => assert!(msg.contains("index unavailable")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn found_redirect_rewrites_post_to_get() {
        let log: CallLog = Arc::default();
        let client = client(hop_pipeline(log.clone()), redirect_config());

        let mut request = OutgoingRequest::post("http://localhost/a")
            .unwrap()
            .with_body(&b"payload"[..]);
        let response = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "landed");
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (Method::POST, "/a".to_string()),
                (Method::GET, "/b".to_string())
            ]
        );
        // The request reflects the final hop and carries no body anymore.
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.path(), "/b");
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn temporary_redirect_preserves_bodyless_method() {
        let log: CallLog = Arc::default();
        let pipeline: PipelineHandle = {
            let log = log.clone();
            Arc::new(move |ctx: RequestContext| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((ctx.method.clone(), ctx.path.clone()));
                    if ctx.path == "/a" {
                        ctx.response().set_status(StatusCode::TEMPORARY_REDIRECT);
                        ctx.response()
                            .insert_header(header::LOCATION, HeaderValue::from_static("/b"));
                    }
                    Ok(())
                }
            })
        };
        let client = client(pipeline, redirect_config());

        let mut request =
            OutgoingRequest::new(Method::DELETE, Url::parse("http://localhost/a").unwrap());
        client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (Method::DELETE, "/a".to_string()),
                (Method::DELETE, "/b".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn temporary_redirect_with_body_is_returned_to_caller() {
        let pipeline: PipelineHandle = Arc::new(|ctx: RequestContext| async move {
            ctx.response().set_status(StatusCode::TEMPORARY_REDIRECT);
            ctx.response()
                .insert_header(header::LOCATION, HeaderValue::from_static("/elsewhere"));
            Ok(())
        });
        let client = client(pipeline, redirect_config());

        let mut request = OutgoingRequest::post("http://localhost/a")
            .unwrap()
            .with_body(&b"payload"[..]);
        let response = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();
        // 307 with a request body is not auto-followed.
        assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn redirect_loop_fails_at_the_configured_limit() {
        let calls = Arc::new(Mutex::new(0usize));
        let pipeline: PipelineHandle = {
            let calls = calls.clone();
            Arc::new(move |ctx: RequestContext| {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    ctx.response().set_status(StatusCode::FOUND);
                    ctx.response()
                        .insert_header(header::LOCATION, HeaderValue::from_static("/loop"));
                    Ok(())
                }
            })
        };
        let config = ClientConfig {
            follow_redirects: true,
            redirect_limit: 1,
            ..ClientConfig::default()
        };
        let client = client(pipeline, config);

        let mut request = OutgoingRequest::get("http://localhost/loop").unwrap();
        let err = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::RedirectLimitExceeded(1)));
        // One original attempt plus the single allowed hop.
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn authorization_header_is_stripped_on_redirect() {
        let saw_auth: Arc<Mutex<Vec<bool>>> = Arc::default();
        let pipeline: PipelineHandle = {
            let saw_auth = saw_auth.clone();
            Arc::new(move |ctx: RequestContext| {
                let saw_auth = saw_auth.clone();
                async move {
                    saw_auth
                        .lock()
                        .unwrap()
                        .push(ctx.headers.contains_key(header::AUTHORIZATION));
                    if ctx.path == "/a" {
                        ctx.response().set_status(StatusCode::MOVED_PERMANENTLY);
                        ctx.response()
                            .insert_header(header::LOCATION, HeaderValue::from_static("/b"));
                    }
                    Ok(())
                }
            })
        };
        let client = client(pipeline, redirect_config());

        let mut request = OutgoingRequest::get("http://localhost/a")
            .unwrap()
            .with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*saw_auth.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn set_cookie_is_replayed_on_the_next_request() {
        let cookie_headers: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
        let pipeline: PipelineHandle = {
            let cookie_headers = cookie_headers.clone();
            Arc::new(move |ctx: RequestContext| {
                let cookie_headers = cookie_headers.clone();
                async move {
                    cookie_headers.lock().unwrap().push(
                        ctx.headers
                            .get(header::COOKIE)
                            .map(|v| v.to_str().unwrap().to_string()),
                    );
                    ctx.response().insert_header(
                        header::SET_COOKIE,
                        HeaderValue::from_static("a=1; Path=/"),
                    );
                    Ok(())
                }
            })
        };
        let config = ClientConfig {
            use_cookies: true,
            ..ClientConfig::default()
        };
        let client = client(pipeline, config);

        let mut first = OutgoingRequest::get("http://localhost/one").unwrap();
        client
            .send(&mut first, CancellationToken::new())
            .await
            .unwrap();
        let mut second = OutgoingRequest::get("http://localhost/two").unwrap();
        client
            .send(&mut second, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *cookie_headers.lock().unwrap(),
            vec![None, Some("a=1".to_string())]
        );
    }

    #[tokio::test]
    async fn cookies_set_during_redirect_reach_the_next_hop() {
        let cookie_headers: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
        let pipeline: PipelineHandle = {
            let cookie_headers = cookie_headers.clone();
            Arc::new(move |ctx: RequestContext| {
                let cookie_headers = cookie_headers.clone();
                async move {
                    cookie_headers.lock().unwrap().push(
                        ctx.headers
                            .get(header::COOKIE)
                            .map(|v| v.to_str().unwrap().to_string()),
                    );
                    if ctx.path == "/a" {
                        ctx.response().set_status(StatusCode::FOUND);
                        ctx.response()
                            .insert_header(header::LOCATION, HeaderValue::from_static("/b"));
                        ctx.response().insert_header(
                            header::SET_COOKIE,
                            HeaderValue::from_static("hop=yes; Path=/"),
                        );
                    }
                    Ok(())
                }
            })
        };
        let config = ClientConfig {
            use_cookies: true,
            follow_redirects: true,
            ..ClientConfig::default()
        };
        let client = client(pipeline, config);

        let mut request = OutgoingRequest::get("http://localhost/a").unwrap();
        client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *cookie_headers.lock().unwrap(),
            vec![None, Some("hop=yes".to_string())]
        );
    }

    #[tokio::test]
    async fn cancellation_fails_send_and_rejects_later_pipeline_writes() {
        let (probe_tx, probe_rx) = tokio::sync::oneshot::channel();
        let probe = Arc::new(Mutex::new(Some(probe_tx)));
        let pipeline: PipelineHandle = Arc::new(move |ctx: RequestContext| {
            let probe = probe.clone();
            async move {
                // Hold the response open until the caller cancels, then try
                // to keep writing. The pause lets the abort land first.
                ctx.cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                let result = ctx.response().write(b"too late");
                if let Some(tx) = probe.lock().unwrap().take() {
                    let _ = tx.send(result);
                }
                Ok(())
            }
        });
        let client = client(pipeline, ClientConfig::default());

        let cancel = CancellationToken::new();
        let mut request = OutgoingRequest::get("http://localhost/slow").unwrap();
        let (result, _) = tokio::join!(client.send(&mut request, cancel.clone()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(TransportError::Cancelled)));
        // The still-running pipeline observed the poisoned channel.
        let write_result = probe_rx.await.unwrap();
        assert!(matches!(write_result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn response_head_arrives_while_body_is_still_streaming() {
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(gate_rx)));
        let pipeline: PipelineHandle = Arc::new(move |ctx: RequestContext| {
            let gate = gate.clone();
            async move {
                ctx.response().write(b"first")?;
                let rx = gate.lock().unwrap().take();
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                ctx.response().write(b" second")?;
                Ok(())
            }
        });
        let client = client(pipeline, ClientConfig::default());

        let mut request = OutgoingRequest::get("http://localhost/stream").unwrap();
        let mut response = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 5];
        response.body_mut().read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");

        // Only now let the pipeline produce the rest.
        gate_tx.send(()).unwrap();
        let mut rest = String::new();
        response.body_mut().read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, " second");
    }

    #[tokio::test]
    async fn configuration_freezes_after_first_send() {
        let pipeline: PipelineHandle =
            Arc::new(|_ctx: RequestContext| async move { Ok(()) });
        let client = client(pipeline, ClientConfig::default());

        client.set_use_cookies(true).unwrap();

        let mut request = OutgoingRequest::get("http://localhost/").unwrap();
        client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            client.set_use_cookies(false),
            Err(TransportError::ConfigFrozen)
        ));
        assert!(matches!(
            client.set_redirect_limit(5),
            Err(TransportError::ConfigFrozen)
        ));
    }

    #[tokio::test]
    async fn disposed_client_rejects_sends() {
        let pipeline: PipelineHandle =
            Arc::new(|_ctx: RequestContext| async move { Ok(()) });
        let client = client(pipeline, ClientConfig::default());
        client.dispose();

        let mut request = OutgoingRequest::get("http://localhost/").unwrap();
        let err = client
            .send(&mut request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disposed));
    }

    #[test]
    fn zero_redirect_limit_is_rejected_at_construction() {
        let pipeline: PipelineHandle =
            Arc::new(|_ctx: RequestContext| async move { Ok(()) });
        let config = ClientConfig {
            redirect_limit: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            LoopbackClient::new(pipeline, Some(config)),
            Err(TransportError::InvalidRedirectLimit)
        ));
    }
}
