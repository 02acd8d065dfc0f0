use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Conditions, MultiRegionConfiguration, ResourceMetadata, Tag, TagMapping};

/// key: kms-key-spec
/// Desired state of a customer managed key. Only `policy`, `tags`,
/// `enableKeyRotation` and `bypassPolicyLockoutSafetyCheck` can change after the
/// key exists.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kms.keyops.dev",
    version = "v1alpha1",
    kind = "Key",
    namespaced,
    status = "KeyStatus",
    derive = "PartialEq",
    shortname = "kmskey",
    printcolumn = r#"{"name":"KEY-ID","type":"string","jsonPath":".status.keyID"}"#,
    printcolumn = r#"{"name":"STATE","type":"string","jsonPath":".status.keyState"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_policy_lockout_safety_check: Option<bool>,
    #[serde(
        default,
        rename = "customKeyStoreID",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_key_store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_key_rotation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_region: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "TagMapping::is_empty")]
    #[schemars(with = "Vec<Tag>")]
    pub tags: TagMapping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KeyState {
    Creating,
    Enabled,
    Disabled,
    PendingDeletion,
    PendingImport,
    PendingReplicaDeletion,
    Unavailable,
    Updating,
}

impl KeyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyState::Creating => "Creating",
            KeyState::Enabled => "Enabled",
            KeyState::Disabled => "Disabled",
            KeyState::PendingDeletion => "PendingDeletion",
            KeyState::PendingImport => "PendingImport",
            KeyState::PendingReplicaDeletion => "PendingReplicaDeletion",
            KeyState::Unavailable => "Unavailable",
            KeyState::Updating => "Updating",
        }
    }

    /// Transitional states the service moves out of on its own.
    pub fn is_transitional(&self) -> bool {
        matches!(self, KeyState::Creating | KeyState::Updating)
    }

    pub fn is_pending_deletion(&self) -> bool {
        matches!(
            self,
            KeyState::PendingDeletion | KeyState::PendingReplicaDeletion
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_resource_metadata: Option<ResourceMetadata>,
    #[serde(default)]
    #[schemars(with = "Vec<super::common::Condition>")]
    pub conditions: Conditions,
    #[serde(
        default,
        rename = "awsAccountID",
        skip_serializing_if = "Option::is_none"
    )]
    pub aws_account_id: Option<String>,
    #[serde(
        default,
        rename = "cloudHsmClusterID",
        skip_serializing_if = "Option::is_none"
    )]
    pub cloud_hsm_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encryption_algorithms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_model: Option<String>,
    #[serde(default, rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_state: Option<KeyState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mac_algorithms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_region_configuration: Option<MultiRegionConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_deletion_window_in_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_algorithms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_uses_wire_field_names() {
        let spec: KeySpec = serde_json::from_value(json!({
            "customKeyStoreID": "cks-1",
            "enableKeyRotation": true,
            "keySpec": "SYMMETRIC_DEFAULT",
            "tags": [{"tagKey": "team", "tagValue": "payments"}],
        }))
        .unwrap();
        assert_eq!(spec.custom_key_store_id.as_deref(), Some("cks-1"));
        assert_eq!(spec.enable_key_rotation, Some(true));
        assert_eq!(spec.tags.get("team"), Some("payments"));
        assert!(spec.policy.is_none());
    }

    #[test]
    fn status_round_trips_key_state() {
        let status: KeyStatus = serde_json::from_value(json!({
            "keyID": "1234",
            "keyState": "PendingDeletion",
            "conditions": [],
        }))
        .unwrap();
        assert_eq!(status.key_state, Some(KeyState::PendingDeletion));
        assert!(status.key_state.unwrap().is_pending_deletion());
        let back = serde_json::to_value(&status).unwrap();
        assert_eq!(back["keyState"], "PendingDeletion");
        assert_eq!(back["keyID"], "1234");
    }
}
