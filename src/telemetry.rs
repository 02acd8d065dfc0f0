use std::time::Duration;

use crate::error::ReconcileError;

pub const API_TARGET: &str = "kms.api";

/// Outcome bucket attached to every remote call record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    NotFound,
    Cancelled,
    Error,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Ok => "ok",
            CallOutcome::NotFound => "not_found",
            CallOutcome::Cancelled => "cancelled",
            CallOutcome::Error => "error",
        }
    }

    pub fn of<T>(result: &Result<T, ReconcileError>) -> Self {
        match result {
            Ok(_) => CallOutcome::Ok,
            Err(err) if err.is_not_found() => CallOutcome::NotFound,
            Err(ReconcileError::Cancelled | ReconcileError::DeadlineExceeded) => {
                CallOutcome::Cancelled
            }
            Err(_) => CallOutcome::Error,
        }
    }
}

/// Emits one record per remote call under the `kms.api` target.
pub fn record_api_call<T>(
    verb: &str,
    operation: &str,
    elapsed: Duration,
    result: &Result<T, ReconcileError>,
) {
    let outcome = CallOutcome::of(result);
    let elapsed_ms = elapsed.as_millis() as u64;
    match result {
        Ok(_) => tracing::debug!(
            target: API_TARGET,
            verb,
            operation,
            elapsed_ms,
            outcome = outcome.as_str(),
            "api call"
        ),
        Err(error) => tracing::info!(
            target: API_TARGET,
            verb,
            operation,
            elapsed_ms,
            outcome = outcome.as_str(),
            %error,
            "api call failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KmsError;

    #[test]
    fn outcomes_are_bucketed() {
        let ok: Result<(), ReconcileError> = Ok(());
        assert_eq!(CallOutcome::of(&ok), CallOutcome::Ok);

        let missing: Result<(), ReconcileError> =
            Err(KmsError::api("NotFoundException", "gone").into());
        assert_eq!(CallOutcome::of(&missing), CallOutcome::NotFound);

        let cancelled: Result<(), ReconcileError> = Err(ReconcileError::DeadlineExceeded);
        assert_eq!(CallOutcome::of(&cancelled), CallOutcome::Cancelled);

        let throttled: Result<(), ReconcileError> =
            Err(KmsError::api("ThrottlingException", "slow down").into());
        assert_eq!(CallOutcome::of(&throttled).as_str(), "error");
    }
}
