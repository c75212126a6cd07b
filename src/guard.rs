use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::error::SyncError;

pub const DEFAULT_FETCH_DEADLINE: Duration = Duration::from_millis(3_000);

/// Fixed wall-clock deadline around one request.
///
/// Exactly one outcome is produced. When the deadline wins, the wrapped future
/// is dropped, so a late response can never be observed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TimeoutGuard {
    deadline: Duration,
}

impl TimeoutGuard {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub async fn run<T, F>(&self, request: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        match timeout(self.deadline, request).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(deadline_ms = %self.deadline.as_millis(), "request exceeded deadline");
                Err(SyncError::Timeout {
                    after: self.deadline,
                })
            }
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_DEADLINE)
    }
}
