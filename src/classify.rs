//! Failure classification for retry decisions
//!
//! Maps a `RemoteError` into what the delivery loop should do with it:
//! retry or give up, how long to wait first, whether the wait is the shared
//! rate-limit cooldown, and whether the connection should be rebuilt.

use std::time::Duration;

use crate::error::{RemoteError, RemoteErrorKind};

/// Default shared cooldown when the service rate-limits without a Retry-After.
pub const RATE_LIMIT_WAIT: Duration = Duration::from_secs(900);

/// Pause before retrying a transient failure.
pub const SHORT_WAIT: Duration = Duration::from_secs(5);

/// Category a failure lands in after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    RateLimit,
    Server,
    Network,
    Auth,
    Forbidden,
    Duplicate,
    Unknown,
}

/// What to do about one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub category: Category,
    /// How long to wait before the next attempt. For `RateLimit` this is the
    /// shared cooldown window, not a local backoff.
    pub wait: Duration,
    /// Rebuild the connection before retrying (honored at most once per call).
    pub reconnect: bool,
}

/// Classify one failure. Exhaustive over `RemoteErrorKind`; rules in
/// priority order:
///
/// 1. Rate limit: retryable, wait comes from Retry-After when present and
///    engages the shared cooldown.
/// 2. Server (5xx): retryable after a short wait.
/// 3. Network: retryable after a short wait.
/// 4. Auth: retryable with a reconnect; token invalidation is often transient.
/// 5. Forbidden: terminal, retrying cannot fix a suspended app.
/// 6. Duplicate: terminal, but the orchestrator treats it as a benign skip.
/// 7. Other: retryable once, keeping the session moving on unrecognized
///    failures instead of halting.
pub fn classify(error: &RemoteError) -> Classification {
    match error.kind {
        RemoteErrorKind::RateLimited => Classification {
            retryable: true,
            category: Category::RateLimit,
            wait: error
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(RATE_LIMIT_WAIT),
            reconnect: false,
        },
        RemoteErrorKind::Server => Classification {
            retryable: true,
            category: Category::Server,
            wait: SHORT_WAIT,
            reconnect: false,
        },
        RemoteErrorKind::Network => Classification {
            retryable: true,
            category: Category::Network,
            wait: SHORT_WAIT,
            reconnect: false,
        },
        RemoteErrorKind::Auth => Classification {
            retryable: true,
            category: Category::Auth,
            wait: SHORT_WAIT,
            reconnect: true,
        },
        RemoteErrorKind::Forbidden => Classification {
            retryable: false,
            category: Category::Forbidden,
            wait: Duration::ZERO,
            reconnect: false,
        },
        RemoteErrorKind::Duplicate => Classification {
            retryable: false,
            category: Category::Duplicate,
            wait: Duration::ZERO,
            reconnect: false,
        },
        RemoteErrorKind::Other => Classification {
            retryable: true,
            category: Category::Unknown,
            wait: SHORT_WAIT,
            reconnect: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_retryable_with_positive_wait() {
        let c = classify(&RemoteError::rate_limited("too many requests"));
        assert!(c.retryable);
        assert_eq!(c.category, Category::RateLimit);
        assert!(c.wait > Duration::ZERO);
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let err = RemoteError::rate_limited("slow down").with_retry_after(42);
        let c = classify(&err);
        assert_eq!(c.wait, Duration::from_secs(42));
    }

    #[test]
    fn test_forbidden_is_terminal() {
        let c = classify(&RemoteError::forbidden("app suspended"));
        assert!(!c.retryable);
        assert_eq!(c.category, Category::Forbidden);
    }

    #[test]
    fn test_duplicate_is_terminal_but_classified_apart() {
        let c = classify(&RemoteError::duplicate("duplicate content"));
        assert!(!c.retryable);
        assert_eq!(c.category, Category::Duplicate);
    }

    #[test]
    fn test_auth_requests_reconnect() {
        let c = classify(&RemoteError::auth("token expired"));
        assert!(c.retryable);
        assert!(c.reconnect);
    }

    #[test]
    fn test_server_and_network_short_wait() {
        for err in [
            RemoteError::server(503, "service unavailable"),
            RemoteError::network("connect timeout"),
        ] {
            let c = classify(&err);
            assert!(c.retryable);
            assert_eq!(c.wait, SHORT_WAIT);
            assert!(!c.reconnect);
        }
    }

    #[test]
    fn test_unknown_defaults_to_retryable() {
        let c = classify(&RemoteError::other("weird response"));
        assert!(c.retryable);
        assert_eq!(c.category, Category::Unknown);
    }
}
