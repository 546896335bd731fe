//! The [`CookieJar`] trait and the in-memory implementation the client
//! installs by default.
//!
//! Parsing covers the `Set-Cookie` subset a loopback transport needs:
//! `Path`, `Domain` (leading dot stripped), `Expires` (stored raw, not
//! enforced), `Secure` and `HttpOnly`. Cookies are bucketed per host and
//! matched to requests with domain/path/secure checks.

use std::collections::HashMap;

use http::header::SET_COOKIE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Storage and scoping of cookies for one client.
pub trait CookieJar: Send + Sync {
    /// Absorb every `Set-Cookie` header of a response received for `url`.
    /// Same-name cookies within a host are replaced, last write wins.
    fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap);

    /// The combined `Cookie` header value to send for `url`, or `None` when
    /// nothing matches its domain, path and scheme.
    fn get_request_cookies(&self, url: &Url) -> Option<String>;

    /// Drop every stored cookie.
    fn clear(&mut self);
}

/// A single stored cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Path scope. Defaults to the directory of the request path.
    pub path: Option<String>,
    /// Domain scope, without a leading dot. Host-only when `None`.
    pub domain: Option<String>,
    /// Sent only over https when set.
    pub secure: bool,
    pub http_only: bool,
    /// Raw `Expires` attribute. Stored for inspection, not enforced.
    pub expires: Option<String>,
}

/// In-memory jar, bucketed by request host. No persistence, no eviction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCookieJar {
    entries: HashMap<String, Vec<Cookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// All cookies currently stored for `host`, mainly for diagnostics.
    pub fn cookies_for_host(&self, host: &str) -> &[Cookie] {
        self.entries.get(host).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl CookieJar for MemoryCookieJar {
    fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap) {
        let Some(host) = url.host_str() else {
            return;
        };
        let default_path = default_path(url.path());
        let bucket = self.entries.entry(host.to_string()).or_default();

        for header in headers.get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            let Some(cookie) = parse_set_cookie(raw, default_path) else {
                continue;
            };
            if let Some(existing) = bucket.iter_mut().find(|c| c.name == cookie.name) {
                *existing = cookie;
            } else {
                bucket.push(cookie);
            }
        }
    }

    fn get_request_cookies(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let path = url.path();
        let is_https = url.scheme() == "https";

        let header = self
            .entries
            .get(host)?
            .iter()
            .filter(|c| match &c.domain {
                Some(domain) => host == domain || host.ends_with(&format!(".{domain}")),
                None => true,
            })
            .filter(|c| match &c.path {
                Some(cookie_path) => path.starts_with(cookie_path.as_str()),
                None => true,
            })
            .filter(|c| !c.secure || is_https)
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Directory of the request path, used when `Path` is absent.
fn default_path(request_path: &str) -> &str {
    match request_path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

fn parse_set_cookie(raw: &str, default_path: &str) -> Option<Cookie> {
    let (name, rest) = raw.split_once('=')?;
    let mut parts = rest.split(';');

    let mut cookie = Cookie {
        name: name.trim().to_string(),
        value: parts.next().unwrap_or_default().trim().to_string(),
        path: None,
        domain: None,
        secure: false,
        http_only: false,
        expires: None,
    };

    for part in parts {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            match key.to_ascii_lowercase().as_str() {
                "path" => cookie.path = Some(value.to_string()),
                "domain" => cookie.domain = Some(value.trim_start_matches('.').to_string()),
                "expires" => cookie.expires = Some(value.to_string()),
                _ => {}
            }
        } else if part.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if part.eq_ignore_ascii_case("httponly") {
            cookie.http_only = true;
        }
    }

    if cookie.path.is_none() {
        cookie.path = Some(default_path.to_string());
    }
    Some(cookie)
}
