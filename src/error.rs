//! Structured remote-call errors
//!
//! Every failure coming back from the X API is mapped into a `RemoteError`
//! at the client boundary, so the classifier dispatches on a tagged kind
//! instead of sniffing error text.

use thiserror::Error;

/// What went wrong on a remote call, as far as retry decisions care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 429 or an explicit rate-limit response
    RateLimited,
    /// 5xx from the remote service
    Server,
    /// Transport-level failure (DNS, connect, timeout)
    Network,
    /// 401 / invalid or expired credentials
    Auth,
    /// 403 that is not a duplicate rejection (suspended app, locked account)
    Forbidden,
    /// The service rejected the content as a duplicate
    Duplicate,
    /// Anything we could not pin down
    Other,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::RateLimited => "rate_limited",
            RemoteErrorKind::Server => "server",
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Auth => "auth",
            RemoteErrorKind::Forbidden => "forbidden",
            RemoteErrorKind::Duplicate => "duplicate",
            RemoteErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote call: kind + HTTP status (when there was one) + detail.
#[derive(Debug, Clone, Error)]
#[error("{message} (kind: {kind}, status: {code:?})")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub code: Option<u16>,
    pub message: String,
    /// Server-suggested wait in seconds (from a Retry-After header)
    pub retry_after: Option<u64>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::RateLimited, Some(429), message)
    }

    pub fn server(code: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Server, Some(code), message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, None, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, Some(401), message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Forbidden, Some(403), message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Duplicate, Some(403), message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Other, None, message)
    }
}
