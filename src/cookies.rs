//! Cookie persistence for the loopback client.
//!
//! One jar is shared across every request a client sends: the outgoing path
//! asks it for a `Cookie` header, the response path feeds it `Set-Cookie`
//! headers. Jars are used through [`CookieJarHandle`]; take a read lock for
//! queries and a write lock for mutations.

pub mod cookie_jar;

use std::sync::{Arc, RwLock};

pub use cookie_jar::{Cookie, CookieJar, MemoryCookieJar};

/// Shared, type-erased handle to a cookie jar.
pub type CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>;

impl From<MemoryCookieJar> for CookieJarHandle {
    fn from(jar: MemoryCookieJar) -> Self {
        Arc::new(RwLock::new(jar))
    }
}
