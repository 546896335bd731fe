#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("too many redirects (limit {0})")]
    RedirectLimitExceeded(usize),

    #[error("redirect response carried no usable Location header")]
    BadRedirect,

    #[error("response body is closed for writing")]
    BodyClosed,

    #[error("client is disposed")]
    Disposed,

    #[error("configuration is frozen once the first request has been sent")]
    ConfigFrozen,

    #[error("redirect limit must be at least 1")]
    InvalidRedirectLimit,

    #[error("internal transport error")]
    Internal,
}
