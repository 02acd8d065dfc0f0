use crate::error::ReconcileResult;
use crate::kms::KmsApi;

use super::context::PassContext;

/// Observed rotation flag. `Unknown` when the service returned no status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationState {
    Unknown,
    Enabled,
    Disabled,
}

impl From<Option<bool>> for RotationState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => RotationState::Enabled,
            Some(false) => RotationState::Disabled,
            None => RotationState::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationTransition {
    Enable,
    Disable,
}

/// Decides the single call, if any, that moves `observed` toward `desired`.
/// An absent desired flag only ever turns an enabled rotation off; an unknown
/// observed state never triggers a call.
pub fn plan_transition(desired: Option<bool>, observed: RotationState) -> Option<RotationTransition> {
    match (desired, observed) {
        (_, RotationState::Unknown) => None,
        (None, RotationState::Enabled) => Some(RotationTransition::Disable),
        (None, RotationState::Disabled) => None,
        (Some(true), RotationState::Disabled) => Some(RotationTransition::Enable),
        (Some(false), RotationState::Enabled) => Some(RotationTransition::Disable),
        (Some(_), _) => None,
    }
}

pub struct RotationReconciler<'a> {
    kms: &'a dyn KmsApi,
    ctx: &'a PassContext,
}

impl<'a> RotationReconciler<'a> {
    pub fn new(kms: &'a dyn KmsApi, ctx: &'a PassContext) -> Self {
        Self { kms, ctx }
    }

    pub async fn observe(&self, key_id: &str) -> ReconcileResult<RotationState> {
        self.ctx
            .call(
                "READ_ONE",
                "GetKeyRotationStatus",
                self.kms.get_key_rotation_status(key_id),
            )
            .await
            .map(RotationState::from)
    }

    /// Reads the remote flag and issues at most one enable or disable call.
    pub async fn reconcile(
        &self,
        key_id: &str,
        desired: Option<bool>,
    ) -> ReconcileResult<Option<RotationTransition>> {
        let observed = self.observe(key_id).await?;
        let transition = plan_transition(desired, observed);
        match transition {
            Some(RotationTransition::Enable) => {
                self.ctx
                    .call(
                        "UPDATE",
                        "EnableKeyRotation",
                        self.kms.enable_key_rotation(key_id),
                    )
                    .await?
            }
            Some(RotationTransition::Disable) => {
                self.ctx
                    .call(
                        "UPDATE",
                        "DisableKeyRotation",
                        self.kms.disable_key_rotation(key_id),
                    )
                    .await?
            }
            None => {}
        }
        if let Some(transition) = transition {
            tracing::info!(%key_id, ?transition, "key rotation updated");
        }
        Ok(transition)
    }
}
