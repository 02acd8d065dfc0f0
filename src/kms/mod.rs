//! Remote key-management service boundary.
//!
//! [`KmsApi`] is the opaque RPC surface the reconcilers drive. Two implementations
//! ship with the crate: [`HttpKmsClient`] speaks the service's JSON protocol and
//! [`InMemoryKms`] keeps everything in process for local runs and tests.

pub mod http;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apis::{KeyState, Tag};

pub use http::HttpKmsClient;
pub use memory::{InMemoryKms, KmsCall};

pub const NOT_FOUND_CODE: &str = "NotFoundException";

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl KmsError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        KmsError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error code returned by the service, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            KmsError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(NOT_FOUND_CODE)
    }
}

pub type KmsResult<T> = Result<T, KmsError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultiRegionKeyRef {
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultiRegionTopology {
    #[serde(default)]
    pub multi_region_key_type: Option<String>,
    #[serde(default)]
    pub primary_key: Option<MultiRegionKeyRef>,
    #[serde(default)]
    pub replica_keys: Vec<MultiRegionKeyRef>,
}

/// key: kms-key-metadata
/// Key description as returned by DescribeKey, CreateKey and ReplicateKey.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMetadata {
    #[serde(default, rename = "AWSAccountId")]
    pub aws_account_id: Option<String>,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub cloud_hsm_cluster_id: Option<String>,
    #[serde(default, with = "epoch_seconds")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_key_store_id: Option<String>,
    #[serde(default, with = "epoch_seconds")]
    pub deletion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub encryption_algorithms: Vec<String>,
    #[serde(default)]
    pub expiration_model: Option<String>,
    pub key_id: String,
    #[serde(default)]
    pub key_manager: Option<String>,
    #[serde(default)]
    pub key_spec: Option<String>,
    #[serde(default)]
    pub key_state: Option<KeyState>,
    #[serde(default)]
    pub key_usage: Option<String>,
    #[serde(default)]
    pub mac_algorithms: Vec<String>,
    #[serde(default)]
    pub multi_region: Option<bool>,
    #[serde(default)]
    pub multi_region_configuration: Option<MultiRegionTopology>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub pending_deletion_window_in_days: Option<i64>,
    #[serde(default)]
    pub signing_algorithms: Vec<String>,
    #[serde(default, with = "epoch_seconds")]
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateKeyInput {
    pub bypass_policy_lockout_safety_check: Option<bool>,
    pub custom_key_store_id: Option<String>,
    pub description: Option<String>,
    pub key_spec: Option<String>,
    pub key_usage: Option<String>,
    pub multi_region: Option<bool>,
    pub origin: Option<String>,
    pub policy: Option<String>,
    pub tags: Vec<Tag>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplicateKeyInput {
    pub key_id: String,
    pub replica_region: String,
    pub description: Option<String>,
    pub policy: Option<String>,
    pub bypass_policy_lockout_safety_check: Option<bool>,
    pub tags: Vec<Tag>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PutKeyPolicyInput {
    pub key_id: String,
    pub policy_name: String,
    pub policy: String,
    pub bypass_policy_lockout_safety_check: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScheduledDeletion {
    pub key_id: String,
    pub key_state: Option<KeyState>,
    pub deletion_date: Option<DateTime<Utc>>,
    pub pending_window_in_days: Option<i64>,
}

/// One page of ListResourceTags.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagPage {
    pub tags: Vec<Tag>,
    pub next_marker: Option<String>,
    pub truncated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasListEntry {
    pub alias_name: String,
    pub alias_arn: Option<String>,
    pub target_key_id: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub last_updated_date: Option<DateTime<Utc>>,
}

/// One page of ListAliases.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasPage {
    pub aliases: Vec<AliasListEntry>,
    pub next_marker: Option<String>,
    pub truncated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateGrantInput {
    pub key_id: String,
    pub grantee_principal: String,
    pub operations: Vec<String>,
    pub retiring_principal: Option<String>,
    pub name: Option<String>,
    pub grant_tokens: Vec<String>,
    pub encryption_context_equals: BTreeMap<String, String>,
    pub encryption_context_subset: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreatedGrant {
    pub grant_id: String,
    pub grant_token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrantListEntry {
    pub grant_id: String,
    pub key_id: String,
    pub name: Option<String>,
    pub grantee_principal: Option<String>,
    pub retiring_principal: Option<String>,
    pub operations: Vec<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

/// One page of ListGrants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrantPage {
    pub grants: Vec<GrantListEntry>,
    pub next_marker: Option<String>,
    pub truncated: bool,
}

/// key: kms-api
/// Remote calls issued by the reconcilers. Every call either returns a typed
/// response or a [`KmsError`] carrying the service's error code.
#[async_trait]
pub trait KmsApi: Send + Sync {
    async fn describe_key(&self, key_id: &str) -> KmsResult<KeyMetadata>;
    async fn create_key(&self, input: CreateKeyInput) -> KmsResult<KeyMetadata>;
    async fn replicate_key(&self, input: ReplicateKeyInput) -> KmsResult<KeyMetadata>;
    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        pending_window_in_days: i64,
    ) -> KmsResult<ScheduledDeletion>;

    /// `None` when the service answered without a rotation status.
    async fn get_key_rotation_status(&self, key_id: &str) -> KmsResult<Option<bool>>;
    async fn enable_key_rotation(&self, key_id: &str) -> KmsResult<()>;
    async fn disable_key_rotation(&self, key_id: &str) -> KmsResult<()>;

    async fn get_key_policy(&self, key_id: &str, policy_name: &str) -> KmsResult<Option<String>>;
    async fn put_key_policy(&self, input: PutKeyPolicyInput) -> KmsResult<()>;

    async fn list_resource_tags(&self, key_id: &str, marker: Option<String>)
        -> KmsResult<TagPage>;
    async fn tag_resource(&self, key_id: &str, tags: Vec<Tag>) -> KmsResult<()>;
    async fn untag_resource(&self, key_id: &str, tag_keys: Vec<String>) -> KmsResult<()>;

    async fn create_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()>;
    async fn update_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()>;
    async fn delete_alias(&self, alias_name: &str) -> KmsResult<()>;
    async fn list_aliases(&self, marker: Option<String>) -> KmsResult<AliasPage>;

    async fn create_grant(&self, input: CreateGrantInput) -> KmsResult<CreatedGrant>;
    async fn list_grants(&self, key_id: &str, marker: Option<String>) -> KmsResult<GrantPage>;
    async fn retire_grant(&self, key_id: &str, grant_id: &str) -> KmsResult<()>;
}

/// Timestamps travel as fractional epoch seconds on the wire.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
            .single()
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_f64(ts.timestamp_millis() as f64 / 1000.0),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.and_then(to_datetime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_metadata_decodes_wire_shape() {
        let metadata: KeyMetadata = serde_json::from_value(json!({
            "AWSAccountId": "111122223333",
            "Arn": "arn:aws:kms:us-west-2:111122223333:key/abcd",
            "CreationDate": 1_700_000_000.5,
            "Enabled": true,
            "KeyId": "abcd",
            "KeyState": "Enabled",
            "MultiRegion": false,
            "EncryptionAlgorithms": ["SYMMETRIC_DEFAULT"],
        }))
        .unwrap();

        assert_eq!(metadata.aws_account_id.as_deref(), Some("111122223333"));
        assert_eq!(metadata.key_state, Some(KeyState::Enabled));
        assert_eq!(
            metadata.creation_date.map(|ts| ts.timestamp_millis()),
            Some(1_700_000_000_500)
        );
        assert!(metadata.deletion_date.is_none());
    }

    #[test]
    fn not_found_is_detected_by_code() {
        assert!(KmsError::api(NOT_FOUND_CODE, "gone").is_not_found());
        assert!(!KmsError::api("DependencyTimeoutException", "slow").is_not_found());
    }
}
