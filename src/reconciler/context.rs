use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ReconcileError, ReconcileResult};
use crate::kms::KmsResult;
use crate::telemetry;

/// Per-pass invocation context. Remote calls go through [`PassContext::call`] so
/// they abort on cancellation or when the pass deadline passes.
#[derive(Clone, Debug, Default)]
pub struct PassContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails when the pass was cancelled or ran past its deadline.
    pub fn ensure_active(&self) -> ReconcileResult<()> {
        if self.token.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ReconcileError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Runs one remote call, racing it against cancellation and the deadline.
    pub async fn call<T, F>(&self, verb: &str, operation: &str, fut: F) -> ReconcileResult<T>
    where
        F: Future<Output = KmsResult<T>>,
    {
        self.ensure_active()?;
        let started = std::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ReconcileError::Cancelled),
            outcome = self.bounded(fut) => outcome,
        };
        telemetry::record_api_call(verb, operation, started.elapsed(), &result);
        result
    }

    async fn bounded<T, F>(&self, fut: F) -> ReconcileResult<T>
    where
        F: Future<Output = KmsResult<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| ReconcileError::DeadlineExceeded)?
                .map_err(ReconcileError::from),
            None => fut.await.map_err(ReconcileError::from),
        }
    }
}
