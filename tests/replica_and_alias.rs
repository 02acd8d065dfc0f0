use std::sync::Arc;

use kms_controller::apis::{Alias, AliasSpec, ReplicaKey, ReplicaKeySpec, TagMapping};
use kms_controller::error::ReconcileError;
use kms_controller::kms::{CreateKeyInput, InMemoryKms, KmsApi, KmsCall};
use kms_controller::reconciler::{PassContext, Reconciler};
use kms_controller::resources::{AccountScope, AliasManager, ReplicaKeyManager};

fn scope() -> AccountScope {
    AccountScope::new("us-west-2", "111122223333")
}

async fn multi_region_primary(kms: &InMemoryKms) -> String {
    kms.create_key(CreateKeyInput {
        multi_region: Some(true),
        ..CreateKeyInput::default()
    })
    .await
    .expect("primary key")
    .key_id
}

fn replica(primary: &str, spec: ReplicaKeySpec) -> ReplicaKey {
    let mut replica = ReplicaKey::new(
        "payments-eu",
        ReplicaKeySpec {
            key_id: Some(primary.to_string()),
            replica_region: "eu-west-1".to_string(),
            ..spec
        },
    );
    replica.metadata.namespace = Some("default".to_string());
    replica
}

fn alias(name: &str, target: &str) -> Alias {
    let mut alias = Alias::new(
        "payments",
        AliasSpec {
            name: name.to_string(),
            target_key_id: Some(target.to_string()),
        },
    );
    alias.metadata.namespace = Some("default".to_string());
    alias
}

#[tokio::test]
async fn replica_is_created_in_its_region_then_tagged() {
    let kms = Arc::new(InMemoryKms::default());
    let primary = multi_region_primary(&kms).await;
    kms.clear_calls();
    let api: Arc<dyn KmsApi> = kms.clone();
    let reconciler = Reconciler::new(ReplicaKeyManager::new(api));

    let desired = replica(
        &primary,
        ReplicaKeySpec {
            tags: [("team", "payments")].into_iter().collect(),
            ..ReplicaKeySpec::default()
        },
    );
    let created = reconciler
        .reconcile(&PassContext::new(), &desired)
        .await
        .unwrap();

    let replica_id = created
        .status
        .as_ref()
        .and_then(|status| status.key_id())
        .unwrap()
        .to_string();
    assert!(replica_id.starts_with("arn:aws:kms:eu-west-1:"));
    let operations: Vec<&str> = kms
        .mutating_calls()
        .iter()
        .map(KmsCall::operation)
        .collect();
    assert_eq!(operations, vec!["ReplicateKey", "TagResource"]);
    assert_eq!(
        kms.tags(&replica_id),
        Some([("team", "payments")].into_iter().collect::<TagMapping>())
    );

    // Next pass finds the replica through status and has nothing to do.
    kms.clear_calls();
    reconciler
        .reconcile(&PassContext::new(), &created)
        .await
        .unwrap();
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn replica_updates_are_terminal() {
    let kms = Arc::new(InMemoryKms::default());
    let primary = multi_region_primary(&kms).await;
    let api: Arc<dyn KmsApi> = kms.clone();
    let reconciler = Reconciler::new(ReplicaKeyManager::new(api));
    let created = reconciler
        .reconcile(
            &PassContext::new(),
            &replica(
                &primary,
                ReplicaKeySpec {
                    description: Some("eu copy".into()),
                    ..ReplicaKeySpec::default()
                },
            ),
        )
        .await
        .unwrap();
    kms.clear_calls();

    let mut changed = created.clone();
    changed.spec.description = Some("renamed".into());
    let failure = reconciler
        .reconcile(&PassContext::new(), &changed)
        .await
        .unwrap_err();
    assert_eq!(
        failure.error.to_string(),
        "replica key resource does not support updates"
    );
    assert!(kms.mutating_calls().is_empty());

    let merged = reconciler
        .update_conditions(&changed, Some(&failure.error))
        .unwrap();
    let terminal = merged
        .status
        .as_ref()
        .and_then(|status| status.conditions.get(kms_controller::apis::ConditionType::Terminal))
        .unwrap();
    assert!(terminal.is_true());
}

#[tokio::test]
async fn replica_delete_schedules_the_replica() {
    let kms = Arc::new(InMemoryKms::default());
    let primary = multi_region_primary(&kms).await;
    let api: Arc<dyn KmsApi> = kms.clone();
    let reconciler = Reconciler::new(ReplicaKeyManager::new(api));
    let created = reconciler
        .reconcile(&PassContext::new(), &replica(&primary, ReplicaKeySpec::default()))
        .await
        .unwrap();
    kms.clear_calls();

    reconciler
        .finalize(&PassContext::new(), &created)
        .await
        .unwrap();
    let replica_id = created.status.as_ref().and_then(|s| s.key_id()).unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::ScheduleKeyDeletion {
            key_id: replica_id.to_string(),
            pending_window_in_days: 7,
        }]
    );
    assert!(kms.key_state(&primary).is_some_and(|state| !state.is_pending_deletion()));
}

#[tokio::test]
async fn alias_lifecycle_uses_canonical_name() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    kms.seed_key("k2", TagMapping::new());
    let api: Arc<dyn KmsApi> = kms.clone();
    let reconciler = Reconciler::new(AliasManager::new(api, scope()));

    let created = reconciler
        .reconcile(&PassContext::new(), &alias("payments", "k1"))
        .await
        .unwrap();
    assert_eq!(kms.alias_target("alias/payments").as_deref(), Some("k1"));

    // Same alias given in canonical form is already converged.
    kms.clear_calls();
    reconciler
        .reconcile(&PassContext::new(), &alias("alias/payments", "k1"))
        .await
        .unwrap();
    assert!(kms.mutating_calls().is_empty());

    let mut retargeted = created.clone();
    retargeted.spec.target_key_id = Some("k2".into());
    reconciler
        .reconcile(&PassContext::new(), &retargeted)
        .await
        .unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::UpdateAlias {
            alias_name: "alias/payments".into(),
            target_key_id: "k2".into(),
        }]
    );

    reconciler
        .finalize(&PassContext::new(), &retargeted)
        .await
        .unwrap();
    assert!(kms.alias_target("alias/payments").is_none());
    reconciler
        .finalize(&PassContext::new(), &retargeted)
        .await
        .unwrap();
}

#[tokio::test]
async fn alias_creation_conflict_is_terminal() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    kms.fail_next("CreateAlias", "AlreadyExistsException", "alias/payments exists");
    let api: Arc<dyn KmsApi> = kms.clone();
    let reconciler = Reconciler::new(AliasManager::new(api, scope()));
    let desired = alias("payments", "k1");

    let failure = reconciler
        .reconcile(&PassContext::new(), &desired)
        .await
        .unwrap_err();
    let merged = reconciler
        .update_conditions(&desired, Some(&failure.error))
        .unwrap();
    let conditions = &merged.status.as_ref().unwrap().conditions;
    assert!(conditions
        .get(kms_controller::apis::ConditionType::Terminal)
        .unwrap()
        .is_true());
    assert!(matches!(failure.error, ReconcileError::Kms(_)));
}
