/// Default number of redirect hops that will be followed automatically.
pub const DEFAULT_REDIRECT_LIMIT: usize = 20;

/// Client configuration. All settings are frozen once the first request
/// has been sent through the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attach jar cookies on the way out and absorb `Set-Cookie` on the way in.
    pub use_cookies: bool,
    /// Follow 301/302/303 (and bodyless 307) responses automatically.
    pub follow_redirects: bool,
    /// Maximum number of redirect hops for one `send` call. Must be >= 1.
    pub redirect_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            use_cookies: false,
            follow_redirects: false,
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
        }
    }
}
