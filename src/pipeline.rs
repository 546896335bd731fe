//! The pipeline contract consumed by the loopback transport.
//!
//! A pipeline is an async function over one [`RequestContext`]: read the
//! request side, set status/headers, write zero or more body chunks, return.
//! Returning without writing is valid and yields an empty body with whatever
//! status was set (200 by default).

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use http::StatusCode;

use crate::loopback::context::RequestContext;

pub type PipelineFuture = BoxFuture<'static, anyhow::Result<()>>;

/// One request-handling function. Implemented for any async closure taking a
/// [`RequestContext`], so middleware can be plain structs and leaf handlers
/// plain closures.
pub trait Pipeline: Send + Sync {
    fn call(&self, ctx: RequestContext) -> PipelineFuture;
}

pub type PipelineHandle = Arc<dyn Pipeline>;

impl<F, Fut> Pipeline for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> PipelineFuture {
        (self)(ctx).boxed()
    }
}

/// Terminal pipeline that answers every request with 404 Not Found.
/// Middleware chains end with this, mirroring how the server side would fall
/// through an unmatched route.
pub fn not_found() -> PipelineHandle {
    Arc::new(|ctx: RequestContext| async move {
        ctx.response().set_status(StatusCode::NOT_FOUND);
        Ok(())
    })
}
