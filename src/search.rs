//! The search pipeline served over the loopback transport: an in-memory
//! document index plus the two middlewares exposing it over HTTP semantics.

pub mod index;
pub mod middleware;

pub use index::{Document, Index, Query, SearchResult};
pub use middleware::{DocumentMiddleware, SearchMiddleware};
