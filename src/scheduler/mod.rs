//! Request scheduling policy.
//!
//! The session manager asks a [`SchedulerApi`] whether opening a session
//! should hit the network. The answer is one of six [`RequestBehavior`]
//! values, which the manager reduces to three independent flags.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SchedulerConfig;

/// Snapshot of the feed handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Head holds at least some content.
    pub has_content: bool,
    /// Epoch millis of the last time head received content (0 if never).
    pub content_creation_date_time_ms: i64,
    /// A refresh is in flight.
    pub is_request_outstanding: bool,
}

/// What a new session should do about the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBehavior {
    NoRequestWithContent,
    NoRequestWithWait,
    NoRequestWithTimeout,
    RequestWithContent,
    RequestWithWait,
    RequestWithTimeout,
}

impl RequestBehavior {
    pub const ALL: [RequestBehavior; 6] = [
        RequestBehavior::NoRequestWithContent,
        RequestBehavior::NoRequestWithWait,
        RequestBehavior::NoRequestWithTimeout,
        RequestBehavior::RequestWithContent,
        RequestBehavior::RequestWithWait,
        RequestBehavior::RequestWithTimeout,
    ];

    /// Start a new network request now.
    pub fn should_make_request(&self) -> bool {
        matches!(
            self,
            RequestBehavior::RequestWithContent
                | RequestBehavior::RequestWithWait
                | RequestBehavior::RequestWithTimeout
        )
    }

    /// Hold population until the outstanding request's results are committed.
    pub fn should_append_outstanding_request(&self) -> bool {
        matches!(
            self,
            RequestBehavior::NoRequestWithWait
                | RequestBehavior::NoRequestWithTimeout
                | RequestBehavior::RequestWithWait
                | RequestBehavior::RequestWithTimeout
        )
    }

    /// Bound the wait with the population timeout.
    pub fn should_populate_with_timeout(&self) -> bool {
        matches!(
            self,
            RequestBehavior::NoRequestWithTimeout | RequestBehavior::RequestWithTimeout
        )
    }

    /// Show current content before the refresh is triggered.
    pub fn populates_before_request(&self) -> bool {
        matches!(self, RequestBehavior::RequestWithContent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestBehavior::NoRequestWithContent => "no_request_with_content",
            RequestBehavior::NoRequestWithWait => "no_request_with_wait",
            RequestBehavior::NoRequestWithTimeout => "no_request_with_timeout",
            RequestBehavior::RequestWithContent => "request_with_content",
            RequestBehavior::RequestWithWait => "request_with_wait",
            RequestBehavior::RequestWithTimeout => "request_with_timeout",
        }
    }
}

impl std::fmt::Display for RequestBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Host policy for request timing.
#[cfg_attr(test, automock)]
pub trait SchedulerApi: Send + Sync {
    /// Decide what a new session should do. Must not have side effects.
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior;

    /// Head received fresh content at `content_creation_ms`.
    fn on_receive_new_content(&self, content_creation_ms: i64);

    /// A refresh failed with `code`.
    fn on_request_error(&self, code: u16);
}

/// Staleness-based default policy.
pub struct TimeBasedScheduler {
    staleness_threshold_ms: i64,
    last_content_ms: AtomicI64,
    last_error_code: AtomicI64,
}

impl TimeBasedScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            staleness_threshold_ms: config.staleness_threshold_ms,
            last_content_ms: AtomicI64::new(0),
            last_error_code: AtomicI64::new(0),
        }
    }

    fn decide(&self, state: &SessionState, now_ms: i64) -> RequestBehavior {
        if !state.has_content {
            if state.is_request_outstanding {
                return RequestBehavior::NoRequestWithWait;
            }
            return RequestBehavior::RequestWithWait;
        }

        let age = now_ms - state.content_creation_date_time_ms;
        if age < self.staleness_threshold_ms {
            RequestBehavior::NoRequestWithContent
        } else if state.is_request_outstanding {
            RequestBehavior::NoRequestWithTimeout
        } else {
            RequestBehavior::RequestWithContent
        }
    }

    /// Last content timestamp reported by the manager.
    pub fn last_content_ms(&self) -> i64 {
        self.last_content_ms.load(Ordering::Relaxed)
    }

    /// Last request error code reported by the manager (0 if none).
    pub fn last_error_code(&self) -> i64 {
        self.last_error_code.load(Ordering::Relaxed)
    }
}

impl SchedulerApi for TimeBasedScheduler {
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior {
        let behavior = self.decide(state, Utc::now().timestamp_millis());
        debug!(?state, behavior = %behavior, "Scheduler decision");
        behavior
    }

    fn on_receive_new_content(&self, content_creation_ms: i64) {
        self.last_content_ms
            .store(content_creation_ms, Ordering::Relaxed);
        self.last_error_code.store(0, Ordering::Relaxed);
    }

    fn on_request_error(&self, code: u16) {
        self.last_error_code.store(code as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TimeBasedScheduler {
        TimeBasedScheduler::new(&SchedulerConfig {
            staleness_threshold_ms: 1000,
        })
    }

    #[test]
    fn test_behavior_flags_table() {
        use RequestBehavior::*;
        let expected = [
            (NoRequestWithContent, false, false, false),
            (NoRequestWithWait, false, true, false),
            (NoRequestWithTimeout, false, true, true),
            (RequestWithContent, true, false, false),
            (RequestWithWait, true, true, false),
            (RequestWithTimeout, true, true, true),
        ];
        for (behavior, request, append, timeout) in expected {
            assert_eq!(behavior.should_make_request(), request, "{behavior}");
            assert_eq!(behavior.should_append_outstanding_request(), append, "{behavior}");
            assert_eq!(behavior.should_populate_with_timeout(), timeout, "{behavior}");
        }
    }

    #[test]
    fn test_only_request_with_content_populates_first() {
        for behavior in RequestBehavior::ALL {
            assert_eq!(
                behavior.populates_before_request(),
                behavior == RequestBehavior::RequestWithContent
            );
        }
    }

    #[test]
    fn test_no_content_requests_with_wait() {
        let state = SessionState {
            has_content: false,
            content_creation_date_time_ms: 0,
            is_request_outstanding: false,
        };
        assert_eq!(scheduler().decide(&state, 5000), RequestBehavior::RequestWithWait);

        let outstanding = SessionState {
            is_request_outstanding: true,
            ..state
        };
        assert_eq!(
            scheduler().decide(&outstanding, 5000),
            RequestBehavior::NoRequestWithWait
        );
    }

    #[test]
    fn test_fresh_and_stale_content() {
        let fresh = SessionState {
            has_content: true,
            content_creation_date_time_ms: 4500,
            is_request_outstanding: false,
        };
        assert_eq!(
            scheduler().decide(&fresh, 5000),
            RequestBehavior::NoRequestWithContent
        );

        let stale = SessionState {
            content_creation_date_time_ms: 1000,
            ..fresh
        };
        assert_eq!(
            scheduler().decide(&stale, 5000),
            RequestBehavior::RequestWithContent
        );

        let stale_outstanding = SessionState {
            is_request_outstanding: true,
            ..stale
        };
        assert_eq!(
            scheduler().decide(&stale_outstanding, 5000),
            RequestBehavior::NoRequestWithTimeout
        );
    }

    #[test]
    fn test_content_and_error_tracking() {
        let s = scheduler();
        s.on_request_error(503);
        assert_eq!(s.last_error_code(), 503);
        s.on_receive_new_content(42);
        assert_eq!(s.last_content_ms(), 42);
        assert_eq!(s.last_error_code(), 0);
    }

    #[test]
    fn test_mock_scheduler_is_consulted() {
        let mut mock = MockSchedulerApi::new();
        mock.expect_should_session_request_data()
            .times(1)
            .returning(|_| RequestBehavior::RequestWithTimeout);
        let state = SessionState {
            has_content: true,
            content_creation_date_time_ms: 0,
            is_request_outstanding: false,
        };
        assert_eq!(
            mock.should_session_request_data(&state),
            RequestBehavior::RequestWithTimeout
        );
    }
}
