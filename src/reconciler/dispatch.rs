use crate::apis::TagMapping;
use crate::error::ReconcileError;
use crate::kms::KmsApi;

use super::context::PassContext;
use super::key_policy::PolicyUpdater;
use super::mutability::Classification;
use super::rotation::RotationReconciler;
use super::tags::TagSetReconciler;

pub const POLICY_PATH: &str = "Spec.Policy";
pub const TAGS_PATH: &str = "Spec.Tags";
pub const ROTATION_PATH: &str = "Spec.EnableKeyRotation";

/// How the tag step treats tags that are present remotely but not desired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagStrategy {
    /// Remove stale tags, then apply the desired set.
    Converge,
    /// Only add. For resources created earlier in the same pass.
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStep {
    Policy,
    Tags,
    Rotation,
}

/// Desired values of the mutable fields of one remote key.
#[derive(Clone, Copy, Debug)]
pub struct UpdateTarget<'a> {
    pub key_id: &'a str,
    pub policy: Option<&'a str>,
    pub bypass_policy_lockout_safety_check: Option<bool>,
    pub tags: &'a TagMapping,
    pub enable_key_rotation: Option<bool>,
}

/// Steps that completed, plus the error that stopped the rest, if any.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub applied: Vec<UpdateStep>,
    pub error: Option<ReconcileError>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// key: update-dispatcher
/// Applies a classified delta as policy, then tags, then rotation. Steps run
/// strictly in sequence and the first failure stops the rest.
pub struct UpdateDispatcher<'a> {
    kms: &'a dyn KmsApi,
    ctx: &'a PassContext,
}

impl<'a> UpdateDispatcher<'a> {
    pub fn new(kms: &'a dyn KmsApi, ctx: &'a PassContext) -> Self {
        Self { kms, ctx }
    }

    pub async fn dispatch(
        &self,
        classification: &Classification,
        target: UpdateTarget<'_>,
        strategy: TagStrategy,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if let Some(error) = classification.terminal_error() {
            tracing::warn!(
                key_id = %target.key_id,
                fields = ?classification.unsupported,
                "refusing update of immutable fields"
            );
            outcome.error = Some(error);
            return outcome;
        }
        let delta = &classification.delta;

        if delta.different_at(POLICY_PATH) {
            if let Some(policy) = target.policy.filter(|policy| !policy.is_empty()) {
                let result = PolicyUpdater::new(self.kms, self.ctx)
                    .put(
                        target.key_id,
                        policy,
                        target.bypass_policy_lockout_safety_check,
                    )
                    .await;
                if let Err(error) = result {
                    outcome.error = Some(error);
                    return outcome;
                }
                outcome.applied.push(UpdateStep::Policy);
            }
        }

        if delta.different_at(TAGS_PATH) {
            let tags = TagSetReconciler::new(self.kms, self.ctx);
            let result = match strategy {
                TagStrategy::Converge => tags.reconcile(target.key_id, target.tags).await,
                TagStrategy::Additive => tags.apply(target.key_id, target.tags).await,
            };
            if let Err(error) = result {
                outcome.error = Some(error);
                return outcome;
            }
            outcome.applied.push(UpdateStep::Tags);
        }

        if delta.different_at(ROTATION_PATH) {
            let result = RotationReconciler::new(self.kms, self.ctx)
                .reconcile(target.key_id, target.enable_key_rotation)
                .await;
            if let Err(error) = result {
                outcome.error = Some(error);
                return outcome;
            }
            outcome.applied.push(UpdateStep::Rotation);
        }

        outcome
    }
}
