//! The in-process transport: request/response types, the byte channel the
//! response body streams through, and the client that drives a pipeline
//! without any network involved.

pub mod body;
pub mod client;
pub mod context;
pub mod request;
pub mod response;
pub(crate) mod state;

pub use body::{ByteStream, ResponseBody};
pub use client::LoopbackClient;
pub use context::{RequestContext, ResponseHandle};
pub use request::OutgoingRequest;
pub use response::ResponseEnvelope;
