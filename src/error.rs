use thiserror::Error;

use crate::kms::KmsError;

/// Failure of a reconciliation step. Classification into persisted conditions
/// happens in one place, [`crate::reconciler::conditions`]; everything else
/// returns these unwrapped.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The requested change can never succeed as declared.
    #[error("{0}")]
    Terminal(String),
    /// Identifying fields are missing or the remote resource does not exist yet.
    #[error("resource not found")]
    NotFound,
    #[error("reconciliation cancelled")]
    Cancelled,
    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Kms(#[from] KmsError),
    #[error("failed to encode resource: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn terminal(message: impl Into<String>) -> Self {
        ReconcileError::Terminal(message.into())
    }

    /// Terminal either by construction or because the remote code is in `codes`.
    pub fn is_terminal_for(&self, codes: &[&str]) -> bool {
        match self {
            ReconcileError::Terminal(_) => true,
            ReconcileError::Kms(err) => err.code().is_some_and(|code| codes.contains(&code)),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ReconcileError::NotFound => true,
            ReconcileError::Kms(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// A failed update together with whatever was converged before the failure.
/// `resource` is authoritative even though `error` is set.
#[derive(Debug)]
pub struct PartialUpdate<R> {
    pub resource: Option<R>,
    pub error: ReconcileError,
}

impl<R> PartialUpdate<R> {
    pub fn new(resource: Option<R>, error: ReconcileError) -> Self {
        Self { resource, error }
    }
}

impl<R> From<ReconcileError> for PartialUpdate<R> {
    fn from(error: ReconcileError) -> Self {
        Self {
            resource: None,
            error,
        }
    }
}

impl<R> From<KmsError> for PartialUpdate<R> {
    fn from(error: KmsError) -> Self {
        ReconcileError::from(error).into()
    }
}
