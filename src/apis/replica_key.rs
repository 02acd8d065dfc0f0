use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, Conditions, MultiRegionConfiguration, Tag, TagMapping};
use super::key::KeyState;

/// key: kms-replica-key-spec
/// Replica of a multi-region primary key in another region. Replicas cannot be
/// updated once created.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kms.keyops.dev",
    version = "v1alpha1",
    kind = "ReplicaKey",
    namespaced,
    status = "ReplicaKeyStatus",
    derive = "PartialEq",
    shortname = "kmsreplica"
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaKeySpec {
    /// Primary key to replicate. Also used as a lookup hint before the replica has
    /// an identifier of its own.
    #[serde(default, rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub replica_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_policy_lockout_safety_check: Option<bool>,
    #[serde(default, skip_serializing_if = "TagMapping::is_empty")]
    #[schemars(with = "Vec<Tag>")]
    pub tags: TagMapping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaKeyMetadata {
    #[serde(
        default,
        rename = "awsAccountID",
        skip_serializing_if = "Option::is_none"
    )]
    pub aws_account_id: Option<String>,
    #[serde(default, rename = "arn", skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_state: Option<KeyState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_region_configuration: Option<MultiRegionConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_deletion_window_in_days: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaKeyStatus {
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_key_metadata: Option<ReplicaKeyMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_policy: Option<String>,
}

impl ReplicaKeyStatus {
    pub fn key_id(&self) -> Option<&str> {
        self.replica_key_metadata
            .as_ref()
            .and_then(|metadata| metadata.key_id.as_deref())
    }
}
