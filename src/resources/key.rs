use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{observed, AccountScope};
use crate::apis::{
    Key, KeySpec, KeyStatus, MultiRegionConfiguration, MultiRegionKey,
    ANNOTATION_DELETE_PENDING_WINDOW,
};
use crate::error::{PartialUpdate, ReconcileError, ReconcileResult};
use crate::kms::{CreateKeyInput, KeyMetadata, KmsApi, MultiRegionKeyRef, MultiRegionTopology};
use crate::reconciler::dispatch::{TagStrategy, UpdateDispatcher, UpdateStep, UpdateTarget};
use crate::reconciler::key_policy::{policies_equivalent, PolicyUpdater};
use crate::reconciler::rotation::{RotationReconciler, RotationState};
use crate::reconciler::tags::TagSetReconciler;
use crate::reconciler::{Classification, PassContext, ResourceManager, UpdateResult};

pub const DEFAULT_DELETE_PENDING_WINDOW_IN_DAYS: i64 = 7;

/// Pending window for ScheduleKeyDeletion, from the annotation when it parses
/// as an integer, otherwise the default.
pub fn delete_pending_window_in_days(meta: &ObjectMeta) -> i64 {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_DELETE_PENDING_WINDOW))
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_DELETE_PENDING_WINDOW_IN_DAYS)
}

pub(crate) fn multi_region_configuration(
    topology: Option<&MultiRegionTopology>,
) -> Option<MultiRegionConfiguration> {
    fn key_ref(reference: &MultiRegionKeyRef) -> MultiRegionKey {
        MultiRegionKey {
            arn: reference.arn.clone(),
            region: reference.region.clone(),
        }
    }
    topology.map(|topology| MultiRegionConfiguration {
        multi_region_key_type: topology.multi_region_key_type.clone(),
        primary_key: topology.primary_key.as_ref().map(key_ref),
        replica_keys: topology.replica_keys.iter().map(key_ref).collect(),
    })
}

/// key: kms-key-manager
pub struct KeyManager {
    kms: Arc<dyn KmsApi>,
    scope: AccountScope,
}

impl KeyManager {
    pub fn new(kms: Arc<dyn KmsApi>, scope: AccountScope) -> Self {
        Self { kms, scope }
    }

    fn apply_metadata(&self, status: &mut KeyStatus, metadata: &KeyMetadata) {
        status.ack_resource_metadata = Some(
            self.scope
                .resource_metadata(metadata.arn.clone(), metadata.aws_account_id.clone()),
        );
        status.aws_account_id = metadata.aws_account_id.clone();
        status.cloud_hsm_cluster_id = metadata.cloud_hsm_cluster_id.clone();
        status.creation_date = metadata.creation_date;
        status.deletion_date = metadata.deletion_date;
        status.enabled = metadata.enabled;
        status.encryption_algorithms = metadata.encryption_algorithms.clone();
        status.expiration_model = metadata.expiration_model.clone();
        status.key_id = Some(metadata.key_id.clone());
        status.key_manager = metadata.key_manager.clone();
        status.key_state = metadata.key_state;
        status.mac_algorithms = metadata.mac_algorithms.clone();
        status.multi_region_configuration =
            multi_region_configuration(metadata.multi_region_configuration.as_ref());
        status.pending_deletion_window_in_days = metadata.pending_deletion_window_in_days;
        status.signing_algorithms = metadata.signing_algorithms.clone();
        status.valid_to = metadata.valid_to;
    }
}

/// Spec as observed remotely, with unset desired fields left unset.
fn observed_spec(desired: &KeySpec, metadata: &KeyMetadata) -> KeySpec {
    KeySpec {
        bypass_policy_lockout_safety_check: desired.bypass_policy_lockout_safety_check,
        custom_key_store_id: observed(
            &desired.custom_key_store_id,
            metadata.custom_key_store_id.clone(),
        ),
        description: observed(&desired.description, metadata.description.clone()),
        enable_key_rotation: desired.enable_key_rotation,
        key_spec: observed(&desired.key_spec, metadata.key_spec.clone()),
        key_usage: observed(&desired.key_usage, metadata.key_usage.clone()),
        multi_region: observed(&desired.multi_region, metadata.multi_region),
        origin: observed(&desired.origin, metadata.origin.clone()),
        policy: desired.policy.clone(),
        tags: desired.tags.clone(),
    }
}

fn observed_rotation(desired: Option<bool>, state: RotationState) -> Option<bool> {
    match state {
        RotationState::Unknown => desired,
        RotationState::Enabled => Some(true),
        RotationState::Disabled => desired.map(|_| false),
    }
}

fn observed_policy(desired: Option<&str>, remote: Option<String>) -> Option<String> {
    match (desired, remote) {
        (None, _) => None,
        (Some(desired), Some(remote)) if policies_equivalent(desired, &remote) => {
            Some(desired.to_string())
        }
        (Some(_), remote) => remote,
    }
}

#[async_trait]
impl ResourceManager for KeyManager {
    type Resource = Key;

    async fn read_one(&self, ctx: &PassContext, resource: &Key) -> ReconcileResult<Key> {
        let key_id = resource
            .status
            .as_ref()
            .and_then(|status| status.key_id.clone())
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

        let mut latest = resource.clone();
        latest.spec = observed_spec(&resource.spec, &metadata);
        self.apply_metadata(latest.status.get_or_insert_with(Default::default), &metadata);
        if metadata
            .key_state
            .is_some_and(|state| state.is_pending_deletion())
        {
            return Ok(latest);
        }

        latest.spec.tags = TagSetReconciler::new(kms, ctx).list(&key_id).await?;
        let rotation = RotationReconciler::new(kms, ctx).observe(&key_id).await?;
        latest.spec.enable_key_rotation =
            observed_rotation(resource.spec.enable_key_rotation, rotation);
        let policy = PolicyUpdater::new(kms, ctx).get(&key_id).await?;
        latest.spec.policy = observed_policy(resource.spec.policy.as_deref(), policy);
        Ok(latest)
    }

    async fn create(&self, ctx: &PassContext, desired: &Key) -> UpdateResult<Key> {
        let spec = &desired.spec;
        let input = CreateKeyInput {
            bypass_policy_lockout_safety_check: spec.bypass_policy_lockout_safety_check,
            custom_key_store_id: spec.custom_key_store_id.clone(),
            description: spec.description.clone(),
            key_spec: spec.key_spec.clone(),
            key_usage: spec.key_usage.clone(),
            multi_region: spec.multi_region,
            origin: spec.origin.clone(),
            policy: spec.policy.clone(),
            tags: spec.tags.to_tags(),
        };
        let metadata = ctx
            .call("CREATE", "CreateKey", self.kms.create_key(input))
            .await?;
        tracing::info!(key_id = %metadata.key_id, "key created");

        let mut created = desired.clone();
        self.apply_metadata(created.status.get_or_insert_with(Default::default), &metadata);

        if spec.enable_key_rotation == Some(true) {
            if let Err(error) = RotationReconciler::new(self.kms.as_ref(), ctx)
                .reconcile(&metadata.key_id, spec.enable_key_rotation)
                .await
            {
                return Err(PartialUpdate::new(Some(created), error));
            }
        }
        Ok(created)
    }

    async fn update(
        &self,
        ctx: &PassContext,
        desired: &Key,
        latest: &Key,
        classification: &Classification,
    ) -> UpdateResult<Key> {
        let key_id = latest
            .status
            .as_ref()
            .and_then(|status| status.key_id.as_deref())
            .ok_or(ReconcileError::NotFound)?;
        let target = UpdateTarget {
            key_id,
            policy: desired.spec.policy.as_deref(),
            bypass_policy_lockout_safety_check: desired.spec.bypass_policy_lockout_safety_check,
            tags: &desired.spec.tags,
            enable_key_rotation: desired.spec.enable_key_rotation,
        };
        let outcome = UpdateDispatcher::new(self.kms.as_ref(), ctx)
            .dispatch(classification, target, TagStrategy::Converge)
            .await;

        let mut updated = latest.clone();
        match outcome.error {
            None => {
                updated.spec = desired.spec.clone();
                Ok(updated)
            }
            Some(error) if outcome.applied.is_empty() && classification.has_unsupported_change() => {
                Err(PartialUpdate::new(None, error))
            }
            Some(error) => {
                for step in &outcome.applied {
                    match step {
                        UpdateStep::Policy => {
                            updated.spec.policy = desired.spec.policy.clone();
                            updated.spec.bypass_policy_lockout_safety_check =
                                desired.spec.bypass_policy_lockout_safety_check;
                        }
                        UpdateStep::Tags => updated.spec.tags = desired.spec.tags.clone(),
                        UpdateStep::Rotation => {
                            updated.spec.enable_key_rotation = desired.spec.enable_key_rotation
                        }
                    }
                }
                Err(PartialUpdate::new(Some(updated), error))
            }
        }
    }

    async fn delete(&self, ctx: &PassContext, resource: &Key) -> ReconcileResult<()> {
        let status = resource.status.as_ref().ok_or(ReconcileError::NotFound)?;
        let key_id = status.key_id.as_deref().ok_or(ReconcileError::NotFound)?;
        if status
            .key_state
            .is_some_and(|state| state.is_pending_deletion())
        {
            tracing::debug!(%key_id, "key already pending deletion");
            return Ok(());
        }
        let window = delete_pending_window_in_days(&resource.metadata);
        ctx.call(
            "DELETE",
            "ScheduleKeyDeletion",
            self.kms.schedule_key_deletion(key_id, window),
        )
        .await?;
        tracing::info!(%key_id, pending_window_in_days = window, "key deletion scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta_with(value: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            annotations: value.map(|value| {
                BTreeMap::from([(
                    ANNOTATION_DELETE_PENDING_WINDOW.to_string(),
                    value.to_string(),
                )])
            }),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn pending_window_defaults_to_seven_days() {
        assert_eq!(delete_pending_window_in_days(&meta_with(None)), 7);
        assert_eq!(delete_pending_window_in_days(&meta_with(Some("not-an-int"))), 7);
        assert_eq!(delete_pending_window_in_days(&meta_with(Some("30"))), 30);
    }

    #[test]
    fn rotation_is_reported_relative_to_the_desired_flag() {
        assert_eq!(observed_rotation(None, RotationState::Disabled), None);
        assert_eq!(observed_rotation(None, RotationState::Enabled), Some(true));
        assert_eq!(observed_rotation(Some(true), RotationState::Disabled), Some(false));
        assert_eq!(observed_rotation(Some(true), RotationState::Unknown), Some(true));
    }

    #[test]
    fn equivalent_policy_keeps_the_desired_text() {
        let desired = r#"{"Version": "2012-10-17"}"#;
        assert_eq!(
            observed_policy(Some(desired), Some(r#"{"Version":"2012-10-17"}"#.into())).as_deref(),
            Some(desired)
        );
        assert_eq!(observed_policy(None, Some("{}".into())), None);
        assert_eq!(
            observed_policy(Some("{}"), Some(r#"{"a":1}"#.into())).as_deref(),
            Some(r#"{"a":1}"#)
        );
    }
}
