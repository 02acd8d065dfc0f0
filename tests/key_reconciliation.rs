use std::collections::BTreeMap;
use std::sync::Arc;

use kms_controller::apis::{
    ConditionStatus, ConditionType, Key, KeySpec, KeyState, KeyStatus, TagMapping,
    ANNOTATION_DELETE_PENDING_WINDOW,
};
use kms_controller::error::ReconcileError;
use kms_controller::kms::{InMemoryKms, KmsApi, KmsCall};
use kms_controller::reconciler::tags::TagSetReconciler;
use kms_controller::reconciler::{PassContext, Reconciler, ResourceManager};
use kms_controller::resources::{AccountScope, KeyManager, KmsResource};
use tokio_util::sync::CancellationToken;

fn tags(pairs: &[(&str, &str)]) -> TagMapping {
    pairs.iter().copied().collect()
}

fn key(spec: KeySpec) -> Key {
    let mut key = Key::new("payments", spec);
    key.metadata.namespace = Some("default".to_string());
    key
}

fn existing(key_id: &str, spec: KeySpec) -> Key {
    let mut key = key(spec);
    key.status = Some(KeyStatus {
        key_id: Some(key_id.to_string()),
        ..KeyStatus::default()
    });
    key
}

fn reconciler(kms: &Arc<InMemoryKms>) -> Reconciler<KeyManager> {
    let api: Arc<dyn KmsApi> = kms.clone();
    Reconciler::new(KeyManager::new(
        api,
        AccountScope::new("us-west-2", "111122223333"),
    ))
}

#[tokio::test]
async fn stale_tags_are_removed_before_desired_tags_are_applied() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", tags(&[("b", "2"), ("c", "3")]));
    let desired = existing(
        "k1",
        KeySpec {
            tags: tags(&[("a", "1"), ("b", "2")]),
            ..KeySpec::default()
        },
    );

    reconciler(&kms)
        .reconcile(&PassContext::new(), &desired)
        .await
        .expect("reconcile succeeds");

    assert_eq!(
        kms.mutating_calls(),
        vec![
            KmsCall::UntagResource {
                key_id: "k1".into(),
                tag_keys: vec!["c".into()],
            },
            KmsCall::TagResource {
                key_id: "k1".into(),
                tags: tags(&[("a", "1"), ("b", "2")]).to_tags(),
            },
        ]
    );
    assert_eq!(kms.tags("k1"), Some(tags(&[("a", "1"), ("b", "2")])));
}

#[tokio::test]
async fn second_pass_over_converged_tags_makes_no_mutating_calls() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", tags(&[("old", "x")]));
    let desired = tags(&[("env", ""), ("team", "payments")]);
    let ctx = PassContext::new();
    let tagger = TagSetReconciler::new(kms.as_ref(), &ctx);

    // The tag reconciler always re-asserts the desired set.
    tagger.reconcile("k1", &desired).await.unwrap();
    kms.clear_calls();
    tagger.reconcile("k1", &desired).await.unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::TagResource {
            key_id: "k1".into(),
            tags: desired.to_tags(),
        }]
    );
    assert_eq!(kms.tags("k1"), Some(desired.clone()));

    // A full pass over converged tags sees no delta and issues nothing.
    kms.clear_calls();
    let key = existing(
        "k1",
        KeySpec {
            tags: desired,
            ..KeySpec::default()
        },
    );
    reconciler(&kms).reconcile(&ctx, &key).await.unwrap();
    reconciler(&kms).reconcile(&ctx, &key).await.unwrap();
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn immutable_field_changes_are_terminal_without_remote_calls() {
    let kms = Arc::new(InMemoryKms::default());
    let reconciler = reconciler(&kms);
    let latest = existing("k1", KeySpec::default());
    let changes: Vec<(&str, KeySpec)> = vec![
        (
            "KeySpec",
            KeySpec {
                key_spec: Some("RSA_2048".into()),
                ..KeySpec::default()
            },
        ),
        (
            "KeyUsage",
            KeySpec {
                key_usage: Some("SIGN_VERIFY".into()),
                ..KeySpec::default()
            },
        ),
        (
            "Origin",
            KeySpec {
                origin: Some("EXTERNAL".into()),
                ..KeySpec::default()
            },
        ),
        (
            "MultiRegion",
            KeySpec {
                multi_region: Some(true),
                ..KeySpec::default()
            },
        ),
        (
            "CustomKeyStoreID",
            KeySpec {
                custom_key_store_id: Some("cks-1234".into()),
                ..KeySpec::default()
            },
        ),
        (
            "Description",
            KeySpec {
                description: Some("renamed".into()),
                ..KeySpec::default()
            },
        ),
    ];

    for (field, spec) in changes {
        let desired = existing("k1", spec);
        let failure = reconciler
            .sync(&PassContext::new(), &desired, &latest)
            .await
            .expect_err("immutable change must fail");
        assert!(matches!(failure.error, ReconcileError::Terminal(_)));
        assert!(failure.resource.is_none());
        let message = failure.error.to_string();
        assert!(
            message.starts_with("Immutable Spec fields have been modified: "),
            "{message}"
        );
        assert!(message.contains(field), "{message} should name {field}");
    }
    assert!(kms.calls().is_empty());
}

#[tokio::test]
async fn rotation_enable_is_a_single_call() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    let desired = existing(
        "k1",
        KeySpec {
            enable_key_rotation: Some(true),
            ..KeySpec::default()
        },
    );

    reconciler(&kms)
        .reconcile(&PassContext::new(), &desired)
        .await
        .unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::EnableKeyRotation {
            key_id: "k1".into()
        }]
    );
    assert_eq!(kms.rotation("k1"), Some(true));
}

#[tokio::test]
async fn rotation_already_matching_makes_no_calls() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    let reconciler = reconciler(&kms);

    for desired_flag in [Some(false), None] {
        let desired = existing(
            "k1",
            KeySpec {
                enable_key_rotation: desired_flag,
                ..KeySpec::default()
            },
        );
        reconciler
            .reconcile(&PassContext::new(), &desired)
            .await
            .unwrap();
    }
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn absent_rotation_preference_disables_enabled_rotation() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    kms.set_rotation("k1", true);

    reconciler(&kms)
        .reconcile(&PassContext::new(), &existing("k1", KeySpec::default()))
        .await
        .unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::DisableKeyRotation {
            key_id: "k1".into()
        }]
    );
}

#[tokio::test]
async fn policy_is_pushed_with_default_name_and_bypass_flag() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    kms.set_policy("k1", r#"{"Version":"2012-10-17","Statement":[]}"#);
    let policy = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow"}]}"#;
    let desired = existing(
        "k1",
        KeySpec {
            policy: Some(policy.into()),
            bypass_policy_lockout_safety_check: Some(true),
            ..KeySpec::default()
        },
    );

    reconciler(&kms)
        .reconcile(&PassContext::new(), &desired)
        .await
        .unwrap();
    let calls = kms.mutating_calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        KmsCall::PutKeyPolicy(input) => {
            assert_eq!(input.policy_name, "default");
            assert_eq!(input.policy, policy);
            assert!(input.bypass_policy_lockout_safety_check);
        }
        other => panic!("unexpected call {other:?}"),
    }

    // Reformatted but equivalent documents do not trigger another push.
    kms.clear_calls();
    let reformatted = existing(
        "k1",
        KeySpec {
            policy: Some(policy.replace(',', ", ")),
            ..KeySpec::default()
        },
    );
    reconciler(&kms)
        .reconcile(&PassContext::new(), &reformatted)
        .await
        .unwrap();
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn create_records_identity_and_enables_requested_rotation() {
    let kms = Arc::new(InMemoryKms::default());
    let desired = key(KeySpec {
        description: Some("payments".into()),
        enable_key_rotation: Some(true),
        tags: tags(&[("team", "payments")]),
        ..KeySpec::default()
    });

    let created = reconciler(&kms)
        .reconcile(&PassContext::new(), &desired)
        .await
        .unwrap();
    let status = created.status.as_ref().unwrap();
    let key_id = status.key_id.clone().unwrap();
    assert_eq!(status.key_state, Some(KeyState::Enabled));
    assert_eq!(
        status
            .ack_resource_metadata
            .as_ref()
            .and_then(|meta| meta.owner_account_id.as_deref()),
        Some("000000000000")
    );
    let operations: Vec<&str> = kms
        .mutating_calls()
        .iter()
        .map(KmsCall::operation)
        .collect();
    assert_eq!(operations, vec!["CreateKey", "EnableKeyRotation"]);
    assert_eq!(kms.tags(&key_id), Some(tags(&[("team", "payments")])));

    kms.clear_calls();
    reconciler(&kms)
        .reconcile(&PassContext::new(), &created)
        .await
        .unwrap();
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn failed_step_returns_what_already_converged() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    kms.fail_next("TagResource", "ThrottlingException", "Rate exceeded");
    let desired = existing(
        "k1",
        KeySpec {
            policy: Some("{}".into()),
            tags: tags(&[("a", "1")]),
            enable_key_rotation: Some(true),
            ..KeySpec::default()
        },
    );

    let failure = reconciler(&kms)
        .reconcile(&PassContext::new(), &desired)
        .await
        .expect_err("tagging fails");
    let partial = failure.resource.expect("partial resource");
    assert_eq!(partial.spec.policy.as_deref(), Some("{}"));
    assert!(partial.spec.tags.is_empty());
    assert_eq!(partial.spec.enable_key_rotation, Some(false));
    assert_eq!(kms.rotation("k1"), Some(false));
    assert_eq!(failure.error.to_string(), "ThrottlingException: Rate exceeded");
}

#[tokio::test]
async fn missing_key_id_means_not_created_yet() {
    let kms = Arc::new(InMemoryKms::default());
    let reconciler = reconciler(&kms);
    let err = reconciler
        .manager()
        .read_one(&PassContext::new(), &key(KeySpec::default()))
        .await;
    assert!(matches!(err, Err(ReconcileError::NotFound)));
}

#[tokio::test]
async fn deleted_remote_key_reads_as_not_found() {
    let kms = Arc::new(InMemoryKms::default());
    let reconciler = reconciler(&kms);
    let err = reconciler
        .manager()
        .read_one(&PassContext::new(), &existing("gone", KeySpec::default()))
        .await;
    assert!(matches!(err, Err(ReconcileError::NotFound)));
}

#[tokio::test]
async fn malformed_pending_window_falls_back_to_seven_days() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    let mut resource = existing("k1", KeySpec::default());
    resource.metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_DELETE_PENDING_WINDOW.to_string(),
        "not-an-int".to_string(),
    )]));

    let reconciler = reconciler(&kms);
    reconciler
        .finalize(&PassContext::new(), &resource)
        .await
        .unwrap();
    assert_eq!(
        kms.mutating_calls(),
        vec![KmsCall::ScheduleKeyDeletion {
            key_id: "k1".into(),
            pending_window_in_days: 7,
        }]
    );

    // Already pending deletion: nothing more to do.
    kms.clear_calls();
    reconciler
        .finalize(&PassContext::new(), &resource)
        .await
        .unwrap();
    assert!(kms.mutating_calls().is_empty());
}

#[tokio::test]
async fn cancelled_pass_is_recoverable() {
    let kms = Arc::new(InMemoryKms::default());
    kms.seed_key("k1", TagMapping::new());
    let token = CancellationToken::new();
    token.cancel();
    let ctx = PassContext::with_cancellation(token);
    let reconciler = reconciler(&kms);
    let mut resource = existing("k1", KeySpec::default());

    let failure = reconciler.reconcile(&ctx, &resource).await.unwrap_err();
    assert!(matches!(failure.error, ReconcileError::Cancelled));
    assert!(kms.calls().is_empty());

    reconciler.record_outcome(&mut resource, Some(&failure.error));
    let conditions = resource.conditions().unwrap();
    assert!(conditions.get(ConditionType::Terminal).is_none());
    assert!(conditions.get(ConditionType::Recoverable).unwrap().is_true());
    assert_eq!(
        conditions.get(ConditionType::Synced).unwrap().status,
        ConditionStatus::False
    );
}

#[tokio::test]
async fn repeated_successes_flip_recoverable_back_to_false() {
    let kms = Arc::new(InMemoryKms::default());
    let reconciler = reconciler(&kms);
    let resource = existing("k1", KeySpec::default());

    assert!(reconciler.update_conditions(&resource, None).is_none());

    let throttled = ReconcileError::from(kms_controller::kms::KmsError::api(
        "ThrottlingException",
        "Rate exceeded",
    ));
    let mut current = reconciler
        .update_conditions(&resource, Some(&throttled))
        .unwrap();
    for _ in 0..2 {
        current = reconciler.update_conditions(&current, None).unwrap();
    }

    let conditions = current.conditions().unwrap();
    assert_eq!(conditions.len(), 1);
    let recoverable = conditions.get(ConditionType::Recoverable).unwrap();
    assert_eq!(recoverable.status, ConditionStatus::False);
    assert!(recoverable.message.is_none());
    assert!(conditions.get(ConditionType::Terminal).is_none());
}

#[tokio::test]
async fn synced_waits_for_a_settled_state() {
    let kms = Arc::new(InMemoryKms::default());
    let reconciler = reconciler(&kms);
    let mut resource = existing("k1", KeySpec::default());
    if let Some(status) = resource.status.as_mut() {
        status.key_state = Some(KeyState::Creating);
    }

    reconciler.record_outcome(&mut resource, None);
    let synced = resource
        .conditions()
        .and_then(|c| c.get(ConditionType::Synced))
        .cloned()
        .unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.message.as_deref(), Some("resource is Creating"));

    if let Some(status) = resource.status.as_mut() {
        status.key_state = Some(KeyState::Enabled);
    }
    reconciler.record_outcome(&mut resource, None);
    assert!(resource
        .conditions()
        .and_then(|c| c.get(ConditionType::Synced))
        .unwrap()
        .is_true());
}
