use std::sync::Arc;

use async_trait::async_trait;

use super::key::multi_region_configuration;
use super::observed;
use crate::apis::{ReplicaKey, ReplicaKeyMetadata, ReplicaKeySpec};
use crate::error::{PartialUpdate, ReconcileError, ReconcileResult};
use crate::kms::{KeyMetadata, KmsApi, ReplicateKeyInput};
use crate::reconciler::key_policy::{policies_equivalent, PolicyUpdater};
use crate::reconciler::tags::TagSetReconciler;
use crate::reconciler::{Classification, PassContext, ResourceManager, UpdateResult};

const UPDATE_UNSUPPORTED: &str = "replica key resource does not support updates";

/// Region segment of a key ARN.
fn arn_region(arn: &str) -> Option<&str> {
    arn.split(':').nth(3).filter(|region| !region.is_empty())
}

fn replica_metadata(metadata: &KeyMetadata) -> ReplicaKeyMetadata {
    ReplicaKeyMetadata {
        aws_account_id: metadata.aws_account_id.clone(),
        arn: metadata.arn.clone(),
        creation_date: metadata.creation_date,
        deletion_date: metadata.deletion_date,
        description: metadata.description.clone(),
        enabled: metadata.enabled,
        key_id: Some(metadata.key_id.clone()),
        key_spec: metadata.key_spec.clone(),
        key_state: metadata.key_state,
        key_usage: metadata.key_usage.clone(),
        multi_region_configuration: multi_region_configuration(
            metadata.multi_region_configuration.as_ref(),
        ),
        origin: metadata.origin.clone(),
        pending_deletion_window_in_days: metadata.pending_deletion_window_in_days,
    }
}

/// key: kms-replica-key-manager
/// Replicates a multi-Region primary key into another region. Replicas are
/// create-and-delete only.
pub struct ReplicaKeyManager {
    kms: Arc<dyn KmsApi>,
}

impl ReplicaKeyManager {
    pub fn new(kms: Arc<dyn KmsApi>) -> Self {
        Self { kms }
    }
}

#[async_trait]
impl ResourceManager for ReplicaKeyManager {
    type Resource = ReplicaKey;

    /// Looks up the replica by the key id recorded in status. Before creation the
    /// spec key id is used as a hint, which only resolves once a key exists in
    /// the replica region.
    async fn read_one(&self, ctx: &PassContext, resource: &ReplicaKey) -> ReconcileResult<ReplicaKey> {
        let recorded = resource
            .status
            .as_ref()
            .and_then(|status| status.key_id())
            .map(str::to_string);
        let from_hint = recorded.is_none();
        let key_id = recorded
            .or_else(|| resource.spec.key_id.clone())
            .ok_or(ReconcileError::NotFound)?;

        let kms = self.kms.as_ref();
        let metadata = ctx
            .call("READ_ONE", "DescribeKey", kms.describe_key(&key_id))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    ReconcileError::NotFound
                } else {
                    err
                }
            })?;
        if from_hint
            && metadata.arn.as_deref().and_then(arn_region) != Some(resource.spec.replica_region.as_str())
        {
            return Err(ReconcileError::NotFound);
        }

        let mut latest = resource.clone();
        latest.spec = ReplicaKeySpec {
            description: observed(&resource.spec.description, metadata.description.clone()),
            ..resource.spec.clone()
        };
        let status = latest.status.get_or_insert_with(Default::default);
        status.replica_key_metadata = Some(replica_metadata(&metadata));
        if metadata
            .key_state
            .is_some_and(|state| state.is_pending_deletion())
        {
            return Ok(latest);
        }

        latest.spec.tags = TagSetReconciler::new(kms, ctx).list(&metadata.key_id).await?;
        let policy = PolicyUpdater::new(kms, ctx).get(&metadata.key_id).await?;
        latest.spec.policy = match (resource.spec.policy.as_deref(), &policy) {
            (None, _) => None,
            (Some(desired), Some(remote)) if policies_equivalent(desired, remote) => {
                Some(desired.to_string())
            }
            (Some(_), remote) => remote.clone(),
        };
        if let Some(status) = latest.status.as_mut() {
            status.replica_policy = policy;
        }
        Ok(latest)
    }

    async fn create(&self, ctx: &PassContext, desired: &ReplicaKey) -> UpdateResult<ReplicaKey> {
        let spec = &desired.spec;
        let primary = spec
            .key_id
            .clone()
            .ok_or_else(|| ReconcileError::terminal("keyID of the primary key is required"))?;
        // Tags go on in a separate additive step once the replica exists.
        let input = ReplicateKeyInput {
            key_id: primary,
            replica_region: spec.replica_region.clone(),
            description: spec.description.clone(),
            policy: spec.policy.clone(),
            bypass_policy_lockout_safety_check: spec.bypass_policy_lockout_safety_check,
            tags: Vec::new(),
        };
        let metadata = ctx
            .call("CREATE", "ReplicateKey", self.kms.replicate_key(input))
            .await?;
        tracing::info!(
            key_id = %metadata.key_id,
            replica_region = %spec.replica_region,
            "replica key created"
        );

        let mut created = desired.clone();
        let status = created.status.get_or_insert_with(Default::default);
        status.replica_key_metadata = Some(replica_metadata(&metadata));
        status.replica_policy = spec.policy.clone();

        if let Err(error) = TagSetReconciler::new(self.kms.as_ref(), ctx)
            .apply(&metadata.key_id, &spec.tags)
            .await
        {
            return Err(PartialUpdate::new(Some(created), error));
        }
        Ok(created)
    }

    async fn update(
        &self,
        _ctx: &PassContext,
        _desired: &ReplicaKey,
        _latest: &ReplicaKey,
        classification: &Classification,
    ) -> UpdateResult<ReplicaKey> {
        let error = classification
            .terminal_error()
            .unwrap_or_else(|| ReconcileError::terminal(UPDATE_UNSUPPORTED));
        Err(error.into())
    }

    async fn delete(&self, ctx: &PassContext, resource: &ReplicaKey) -> ReconcileResult<()> {
        let status = resource.status.as_ref().ok_or(ReconcileError::NotFound)?;
        let key_id = status.key_id().ok_or(ReconcileError::NotFound)?;
        let already_pending = status
            .replica_key_metadata
            .as_ref()
            .and_then(|metadata| metadata.key_state)
            .is_some_and(|state| state.is_pending_deletion());
        if already_pending {
            return Ok(());
        }
        let window = super::key::delete_pending_window_in_days(&resource.metadata);
        ctx.call(
            "DELETE",
            "ScheduleKeyDeletion",
            self.kms.schedule_key_deletion(key_id, window),
        )
        .await?;
        tracing::info!(%key_id, pending_window_in_days = window, "replica key deletion scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_read_from_the_arn() {
        assert_eq!(
            arn_region("arn:aws:kms:eu-west-1:111122223333:key/mrk-1"),
            Some("eu-west-1")
        );
        assert_eq!(arn_region("mrk-1"), None);
    }
}
