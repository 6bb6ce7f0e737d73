//! Cancellation and deadline handling for a single reconcile pass.

use crate::error::{OperatorError, OperatorResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bounds every blocking call made during one reconcile pass.
///
/// Calls wrapped in [`PassScope::run`] return [`OperatorError::Cancelled`] as
/// soon as the token fires and [`OperatorError::DeadlineExceeded`] once the
/// pass deadline has passed.
#[derive(Debug, Clone)]
pub struct PassScope {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl PassScope {
    /// Start a pass that must finish within `timeout`.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Run a store or hook call under the pass bounds.
    pub async fn run<T, F>(&self, call: F) -> OperatorResult<T>
    where
        F: Future<Output = OperatorResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(OperatorError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OperatorError::Cancelled),
            result = tokio::time::timeout_at(self.deadline, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(OperatorError::DeadlineExceeded(self.timeout)),
            },
        }
    }
}
