//! In-process HTTP loopback transport.
//!
//! `loopline` runs an HTTP-shaped request/response exchange entirely inside
//! one process: a [`LoopbackClient`] translates an [`OutgoingRequest`] into a
//! [`RequestContext`], invokes a [`Pipeline`] on a background task, and hands
//! the caller a [`ResponseEnvelope`] whose body streams live from the byte
//! channel the pipeline writes into. Cookies and redirect following work the
//! way a real client's would, without opening a socket.
//!
//! The [`search`] module ships a small document index and the middleware pair
//! exposing it, which doubles as a realistic pipeline to test the transport
//! against.
//!
//! ```no_run
//! use std::sync::Arc;
//! use loopline::{LoopbackClient, OutgoingRequest, RequestContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pipeline: loopline::PipelineHandle = Arc::new(|ctx: RequestContext| async move {
//!     ctx.response().write(b"hello")?;
//!     Ok(())
//! });
//! let client = LoopbackClient::new(pipeline, None)?;
//! let mut request = OutgoingRequest::get("http://localhost/hello")?;
//! let response = client.send(&mut request, CancellationToken::new()).await?;
//! assert_eq!(response.text().await?, "hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cookies;
pub mod errors;
pub mod loopback;
pub mod pipeline;
pub mod search;

pub use config::ClientConfig;
pub use cookies::{CookieJar, CookieJarHandle, MemoryCookieJar};
pub use errors::TransportError;
pub use loopback::{
    LoopbackClient, OutgoingRequest, RequestContext, ResponseEnvelope, ResponseHandle,
};
pub use pipeline::{not_found, Pipeline, PipelineFuture, PipelineHandle};
