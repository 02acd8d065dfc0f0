use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    epoch_seconds, AliasListEntry, AliasPage, CreateGrantInput, CreateKeyInput, CreatedGrant,
    GrantListEntry, GrantPage, KeyMetadata, KmsApi, KmsError, KmsResult, PutKeyPolicyInput,
    ReplicateKeyInput, ScheduledDeletion, TagPage,
};
use crate::apis::{KeyState, Tag};

const TARGET_PREFIX: &str = "TrentService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// key: kms-http-client
/// Client for the key-management JSON protocol: every operation is a `POST /`
/// naming the operation in the `X-Amz-Target` header. The endpoint is expected to
/// be reachable without request signing (local emulator or an authenticating
/// sidecar).
pub struct HttpKmsClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadataResponse {
    key_metadata: KeyMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReplicateKeyResponse {
    replica_key_metadata: KeyMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduleKeyDeletionResponse {
    key_id: String,
    #[serde(default)]
    key_state: Option<KeyState>,
    #[serde(default, with = "epoch_seconds")]
    deletion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pending_window_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RotationStatusResponse {
    #[serde(default)]
    key_rotation_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPolicyResponse {
    #[serde(default)]
    policy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTag {
    tag_key: String,
    #[serde(default)]
    tag_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResourceTagsResponse {
    #[serde(default)]
    tags: Vec<WireTag>,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    truncated: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAlias {
    alias_name: String,
    #[serde(default)]
    alias_arn: Option<String>,
    #[serde(default)]
    target_key_id: Option<String>,
    #[serde(default, with = "epoch_seconds")]
    creation_date: Option<DateTime<Utc>>,
    #[serde(default, with = "epoch_seconds")]
    last_updated_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAliasesResponse {
    #[serde(default)]
    aliases: Vec<WireAlias>,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    truncated: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateGrantResponse {
    grant_id: String,
    #[serde(default)]
    grant_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireGrant {
    grant_id: String,
    key_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    grantee_principal: Option<String>,
    #[serde(default)]
    retiring_principal: Option<String>,
    #[serde(default)]
    operations: Vec<String>,
    #[serde(default, with = "epoch_seconds")]
    creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListGrantsResponse {
    #[serde(default)]
    grants: Vec<WireGrant>,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    truncated: Option<bool>,
}

impl HttpKmsClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> KmsResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn invoke(&self, operation: &str, body: Value) -> KmsResult<Value> {
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(serde_json::to_vec(&compact(body))?)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(decode_error(status, &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn invoke_as<T: DeserializeOwned>(&self, operation: &str, body: Value) -> KmsResult<T> {
        let value = self.invoke(operation, body).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Drops `null` members so optional inputs are omitted rather than sent empty.
fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}

fn wire_tags(tags: &[Tag]) -> Value {
    Value::Array(
        tags.iter()
            .map(|tag| json!({"TagKey": tag.tag_key, "TagValue": tag.tag_value}))
            .collect(),
    )
}

fn decode_error(status: reqwest::StatusCode, bytes: &[u8]) -> KmsError {
    let parsed = serde_json::from_slice::<ErrorBody>(bytes).ok();
    let code = parsed
        .as_ref()
        .and_then(|body| body.error_type.as_deref())
        .map(|raw| raw.rsplit('#').next().unwrap_or(raw).to_string())
        .unwrap_or_else(|| format!("Http{}", status.as_u16()));
    let message = parsed
        .and_then(|body| body.message)
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned());
    KmsError::api(code, message)
}

#[async_trait]
impl KmsApi for HttpKmsClient {
    async fn describe_key(&self, key_id: &str) -> KmsResult<KeyMetadata> {
        let response: KeyMetadataResponse = self
            .invoke_as("DescribeKey", json!({ "KeyId": key_id }))
            .await?;
        Ok(response.key_metadata)
    }

    async fn create_key(&self, input: CreateKeyInput) -> KmsResult<KeyMetadata> {
        let tags = (!input.tags.is_empty()).then(|| wire_tags(&input.tags));
        let response: KeyMetadataResponse = self
            .invoke_as(
                "CreateKey",
                json!({
                    "BypassPolicyLockoutSafetyCheck": input.bypass_policy_lockout_safety_check,
                    "CustomKeyStoreId": input.custom_key_store_id,
                    "Description": input.description,
                    "KeySpec": input.key_spec,
                    "KeyUsage": input.key_usage,
                    "MultiRegion": input.multi_region,
                    "Origin": input.origin,
                    "Policy": input.policy,
                    "Tags": tags,
                }),
            )
            .await?;
        Ok(response.key_metadata)
    }

    async fn replicate_key(&self, input: ReplicateKeyInput) -> KmsResult<KeyMetadata> {
        let tags = (!input.tags.is_empty()).then(|| wire_tags(&input.tags));
        let response: ReplicateKeyResponse = self
            .invoke_as(
                "ReplicateKey",
                json!({
                    "KeyId": input.key_id,
                    "ReplicaRegion": input.replica_region,
                    "Description": input.description,
                    "Policy": input.policy,
                    "BypassPolicyLockoutSafetyCheck": input.bypass_policy_lockout_safety_check,
                    "Tags": tags,
                }),
            )
            .await?;
        Ok(response.replica_key_metadata)
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        pending_window_in_days: i64,
    ) -> KmsResult<ScheduledDeletion> {
        let response: ScheduleKeyDeletionResponse = self
            .invoke_as(
                "ScheduleKeyDeletion",
                json!({ "KeyId": key_id, "PendingWindowInDays": pending_window_in_days }),
            )
            .await?;
        Ok(ScheduledDeletion {
            key_id: response.key_id,
            key_state: response.key_state,
            deletion_date: response.deletion_date,
            pending_window_in_days: response.pending_window_in_days,
        })
    }

    async fn get_key_rotation_status(&self, key_id: &str) -> KmsResult<Option<bool>> {
        let value = self
            .invoke("GetKeyRotationStatus", json!({ "KeyId": key_id }))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let response: RotationStatusResponse = serde_json::from_value(value)?;
        Ok(response.key_rotation_enabled)
    }

    async fn enable_key_rotation(&self, key_id: &str) -> KmsResult<()> {
        self.invoke("EnableKeyRotation", json!({ "KeyId": key_id }))
            .await?;
        Ok(())
    }

    async fn disable_key_rotation(&self, key_id: &str) -> KmsResult<()> {
        self.invoke("DisableKeyRotation", json!({ "KeyId": key_id }))
            .await?;
        Ok(())
    }

    async fn get_key_policy(&self, key_id: &str, policy_name: &str) -> KmsResult<Option<String>> {
        let response: KeyPolicyResponse = self
            .invoke_as(
                "GetKeyPolicy",
                json!({ "KeyId": key_id, "PolicyName": policy_name }),
            )
            .await?;
        Ok(response.policy)
    }

    async fn put_key_policy(&self, input: PutKeyPolicyInput) -> KmsResult<()> {
        self.invoke(
            "PutKeyPolicy",
            json!({
                "KeyId": input.key_id,
                "PolicyName": input.policy_name,
                "Policy": input.policy,
                "BypassPolicyLockoutSafetyCheck": input.bypass_policy_lockout_safety_check,
            }),
        )
        .await?;
        Ok(())
    }

    async fn list_resource_tags(
        &self,
        key_id: &str,
        marker: Option<String>,
    ) -> KmsResult<TagPage> {
        let response: ListResourceTagsResponse = self
            .invoke_as(
                "ListResourceTags",
                json!({ "KeyId": key_id, "Marker": marker }),
            )
            .await?;
        Ok(TagPage {
            tags: response
                .tags
                .into_iter()
                .map(|tag| Tag::new(tag.tag_key, tag.tag_value))
                .collect(),
            next_marker: response.next_marker,
            truncated: response.truncated.unwrap_or(false),
        })
    }

    async fn tag_resource(&self, key_id: &str, tags: Vec<Tag>) -> KmsResult<()> {
        self.invoke(
            "TagResource",
            json!({ "KeyId": key_id, "Tags": wire_tags(&tags) }),
        )
        .await?;
        Ok(())
    }

    async fn untag_resource(&self, key_id: &str, tag_keys: Vec<String>) -> KmsResult<()> {
        self.invoke(
            "UntagResource",
            json!({ "KeyId": key_id, "TagKeys": tag_keys }),
        )
        .await?;
        Ok(())
    }

    async fn create_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()> {
        self.invoke(
            "CreateAlias",
            json!({ "AliasName": alias_name, "TargetKeyId": target_key_id }),
        )
        .await?;
        Ok(())
    }

    async fn update_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()> {
        self.invoke(
            "UpdateAlias",
            json!({ "AliasName": alias_name, "TargetKeyId": target_key_id }),
        )
        .await?;
        Ok(())
    }

    async fn delete_alias(&self, alias_name: &str) -> KmsResult<()> {
        self.invoke("DeleteAlias", json!({ "AliasName": alias_name }))
            .await?;
        Ok(())
    }

    async fn list_aliases(&self, marker: Option<String>) -> KmsResult<AliasPage> {
        let response: ListAliasesResponse = self
            .invoke_as("ListAliases", json!({ "Marker": marker }))
            .await?;
        Ok(AliasPage {
            aliases: response
                .aliases
                .into_iter()
                .map(|alias| AliasListEntry {
                    alias_name: alias.alias_name,
                    alias_arn: alias.alias_arn,
                    target_key_id: alias.target_key_id,
                    creation_date: alias.creation_date,
                    last_updated_date: alias.last_updated_date,
                })
                .collect(),
            next_marker: response.next_marker,
            truncated: response.truncated.unwrap_or(false),
        })
    }

    async fn create_grant(&self, input: CreateGrantInput) -> KmsResult<CreatedGrant> {
        let constraints = (!input.encryption_context_equals.is_empty()
            || !input.encryption_context_subset.is_empty())
        .then(|| {
            compact(json!({
                "EncryptionContextEquals": (!input.encryption_context_equals.is_empty())
                    .then_some(&input.encryption_context_equals),
                "EncryptionContextSubset": (!input.encryption_context_subset.is_empty())
                    .then_some(&input.encryption_context_subset),
            }))
        });
        let grant_tokens = (!input.grant_tokens.is_empty()).then_some(&input.grant_tokens);
        let response: CreateGrantResponse = self
            .invoke_as(
                "CreateGrant",
                json!({
                    "KeyId": input.key_id,
                    "GranteePrincipal": input.grantee_principal,
                    "Operations": input.operations,
                    "RetiringPrincipal": input.retiring_principal,
                    "Name": input.name,
                    "GrantTokens": grant_tokens,
                    "Constraints": constraints,
                }),
            )
            .await?;
        Ok(CreatedGrant {
            grant_id: response.grant_id,
            grant_token: response.grant_token,
        })
    }

    async fn list_grants(&self, key_id: &str, marker: Option<String>) -> KmsResult<GrantPage> {
        let response: ListGrantsResponse = self
            .invoke_as("ListGrants", json!({ "KeyId": key_id, "Marker": marker }))
            .await?;
        Ok(GrantPage {
            grants: response
                .grants
                .into_iter()
                .map(|grant| GrantListEntry {
                    grant_id: grant.grant_id,
                    key_id: grant.key_id,
                    name: grant.name,
                    grantee_principal: grant.grantee_principal,
                    retiring_principal: grant.retiring_principal,
                    operations: grant.operations,
                    creation_date: grant.creation_date,
                })
                .collect(),
            next_marker: response.next_marker,
            truncated: response.truncated.unwrap_or(false),
        })
    }

    async fn retire_grant(&self, key_id: &str, grant_id: &str) -> KmsResult<()> {
        self.invoke(
            "RetireGrant",
            json!({ "KeyId": key_id, "GrantId": grant_id }),
        )
        .await?;
        Ok(())
    }
}
