use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{
    AliasListEntry, AliasPage, CreateGrantInput, CreateKeyInput, CreatedGrant, GrantListEntry,
    GrantPage, KeyMetadata, KmsApi, KmsError, KmsResult,
    MultiRegionKeyRef, MultiRegionTopology, PutKeyPolicyInput, ReplicateKeyInput,
    ScheduledDeletion, TagPage, NOT_FOUND_CODE,
};
use crate::apis::{KeyState, Tag, TagMapping};

const DEFAULT_TAG_PAGE_SIZE: usize = 50;

/// Journal entry for every call the in-memory service receives.
#[derive(Clone, Debug, PartialEq)]
pub enum KmsCall {
    DescribeKey { key_id: String },
    CreateKey { tags: Vec<Tag> },
    ReplicateKey { key_id: String, replica_region: String },
    ScheduleKeyDeletion { key_id: String, pending_window_in_days: i64 },
    GetKeyRotationStatus { key_id: String },
    EnableKeyRotation { key_id: String },
    DisableKeyRotation { key_id: String },
    GetKeyPolicy { key_id: String },
    PutKeyPolicy(PutKeyPolicyInput),
    ListResourceTags { key_id: String, marker: Option<String> },
    TagResource { key_id: String, tags: Vec<Tag> },
    UntagResource { key_id: String, tag_keys: Vec<String> },
    CreateAlias { alias_name: String, target_key_id: String },
    UpdateAlias { alias_name: String, target_key_id: String },
    DeleteAlias { alias_name: String },
    ListAliases { marker: Option<String> },
    CreateGrant { key_id: String, grantee_principal: String, operations: Vec<String> },
    ListGrants { key_id: String, marker: Option<String> },
    RetireGrant { key_id: String, grant_id: String },
}

impl KmsCall {
    pub fn operation(&self) -> &'static str {
        match self {
            KmsCall::DescribeKey { .. } => "DescribeKey",
            KmsCall::CreateKey { .. } => "CreateKey",
            KmsCall::ReplicateKey { .. } => "ReplicateKey",
            KmsCall::ScheduleKeyDeletion { .. } => "ScheduleKeyDeletion",
            KmsCall::GetKeyRotationStatus { .. } => "GetKeyRotationStatus",
            KmsCall::EnableKeyRotation { .. } => "EnableKeyRotation",
            KmsCall::DisableKeyRotation { .. } => "DisableKeyRotation",
            KmsCall::GetKeyPolicy { .. } => "GetKeyPolicy",
            KmsCall::PutKeyPolicy(_) => "PutKeyPolicy",
            KmsCall::ListResourceTags { .. } => "ListResourceTags",
            KmsCall::TagResource { .. } => "TagResource",
            KmsCall::UntagResource { .. } => "UntagResource",
            KmsCall::CreateAlias { .. } => "CreateAlias",
            KmsCall::UpdateAlias { .. } => "UpdateAlias",
            KmsCall::DeleteAlias { .. } => "DeleteAlias",
            KmsCall::ListAliases { .. } => "ListAliases",
            KmsCall::CreateGrant { .. } => "CreateGrant",
            KmsCall::ListGrants { .. } => "ListGrants",
            KmsCall::RetireGrant { .. } => "RetireGrant",
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            KmsCall::DescribeKey { .. }
                | KmsCall::GetKeyRotationStatus { .. }
                | KmsCall::GetKeyPolicy { .. }
                | KmsCall::ListResourceTags { .. }
                | KmsCall::ListAliases { .. }
                | KmsCall::ListGrants { .. }
        )
    }
}

#[derive(Clone, Debug)]
struct StoredKey {
    metadata: KeyMetadata,
    rotation_enabled: bool,
    policy: Option<String>,
    tags: TagMapping,
}

#[derive(Clone, Debug)]
struct StoredAlias {
    target_key_id: String,
    created: chrono::DateTime<Utc>,
    updated: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, StoredKey>,
    aliases: BTreeMap<String, StoredAlias>,
    grants: BTreeMap<String, GrantListEntry>,
    calls: Vec<KmsCall>,
    failures: HashMap<String, Vec<(String, String)>>,
    rotation_status_unavailable: bool,
}

/// key: kms-in-memory
/// In-process key-management service. Keeps keys, tags, policies, rotation flags
/// and aliases in memory, journals every call, and can be told to fail the next
/// call of a given operation.
pub struct InMemoryKms {
    region: String,
    account_id: String,
    tag_page_size: usize,
    state: Mutex<State>,
}

impl Default for InMemoryKms {
    fn default() -> Self {
        Self::new("us-west-2", "000000000000")
    }
}

impl InMemoryKms {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            tag_page_size: DEFAULT_TAG_PAGE_SIZE,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_tag_page_size(mut self, size: usize) -> Self {
        self.tag_page_size = size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_arn(&self, region: &str, key_id: &str) -> String {
        format!("arn:aws:kms:{region}:{}:key/{key_id}", self.account_id)
    }

    /// Registers a key directly, bypassing the journal. Returns its id.
    pub fn insert_key(&self, metadata: KeyMetadata) -> String {
        let key_id = metadata.key_id.clone();
        self.lock().keys.insert(
            key_id.clone(),
            StoredKey {
                metadata,
                rotation_enabled: false,
                policy: None,
                tags: TagMapping::new(),
            },
        );
        key_id
    }

    /// Registers an enabled symmetric key with the given tags.
    pub fn seed_key(&self, key_id: &str, tags: TagMapping) -> String {
        let metadata = KeyMetadata {
            aws_account_id: Some(self.account_id.clone()),
            arn: Some(self.key_arn(&self.region, key_id)),
            creation_date: Some(Utc::now()),
            enabled: Some(true),
            key_id: key_id.to_string(),
            key_manager: Some("CUSTOMER".to_string()),
            key_spec: Some("SYMMETRIC_DEFAULT".to_string()),
            key_state: Some(KeyState::Enabled),
            key_usage: Some("ENCRYPT_DECRYPT".to_string()),
            multi_region: Some(false),
            origin: Some("AWS_KMS".to_string()),
            encryption_algorithms: vec!["SYMMETRIC_DEFAULT".to_string()],
            ..KeyMetadata::default()
        };
        self.insert_key(metadata);
        self.lock()
            .keys
            .entry(key_id.to_string())
            .and_modify(|key| key.tags = tags);
        key_id.to_string()
    }

    pub fn set_rotation(&self, key_id: &str, enabled: bool) {
        if let Some(key) = self.lock().keys.get_mut(key_id) {
            key.rotation_enabled = enabled;
        }
    }

    pub fn set_policy(&self, key_id: &str, policy: impl Into<String>) {
        if let Some(key) = self.lock().keys.get_mut(key_id) {
            key.policy = Some(policy.into());
        }
    }

    /// Makes GetKeyRotationStatus answer without a status.
    pub fn set_rotation_status_unavailable(&self, unavailable: bool) {
        self.lock().rotation_status_unavailable = unavailable;
    }

    /// Fails the next call of `operation` with the given error code.
    pub fn fail_next(&self, operation: &str, code: &str, message: &str) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push((code.to_string(), message.to_string()));
    }

    pub fn tags(&self, key_id: &str) -> Option<TagMapping> {
        self.lock().keys.get(key_id).map(|key| key.tags.clone())
    }

    pub fn rotation(&self, key_id: &str) -> Option<bool> {
        self.lock().keys.get(key_id).map(|key| key.rotation_enabled)
    }

    pub fn policy(&self, key_id: &str) -> Option<String> {
        self.lock()
            .keys
            .get(key_id)
            .and_then(|key| key.policy.clone())
    }

    pub fn key_state(&self, key_id: &str) -> Option<KeyState> {
        self.lock()
            .keys
            .get(key_id)
            .and_then(|key| key.metadata.key_state)
    }

    pub fn alias_target(&self, alias_name: &str) -> Option<String> {
        self.lock()
            .aliases
            .get(alias_name)
            .map(|alias| alias.target_key_id.clone())
    }

    /// Active grants on a key, in grant id order.
    pub fn grants(&self, key_id: &str) -> Vec<GrantListEntry> {
        self.lock()
            .grants
            .values()
            .filter(|grant| grant.key_id == key_id)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<KmsCall> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<KmsCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Records the call and pops any injected failure for its operation.
    fn record(state: &mut State, call: KmsCall) -> KmsResult<()> {
        let operation = call.operation();
        state.calls.push(call);
        if let Some(queue) = state.failures.get_mut(operation) {
            if !queue.is_empty() {
                let (code, message) = queue.remove(0);
                return Err(KmsError::api(code, message));
            }
        }
        Ok(())
    }

    /// End of the page starting at `start`, clamped to `len`.
    fn page_end(&self, start: usize, len: usize) -> usize {
        start.saturating_add(self.tag_page_size).min(len)
    }

    fn not_found(key_id: &str) -> KmsError {
        KmsError::api(NOT_FOUND_CODE, format!("Key '{key_id}' does not exist"))
    }

    fn resolve_key_id(state: &State, key_id: &str) -> Option<String> {
        if state.keys.contains_key(key_id) {
            return Some(key_id.to_string());
        }
        if let Some(alias) = state.aliases.get(key_id) {
            return Some(alias.target_key_id.clone());
        }
        state
            .keys
            .values()
            .find(|key| key.metadata.arn.as_deref() == Some(key_id))
            .map(|key| key.metadata.key_id.clone())
    }

    fn key_mut<'a>(state: &'a mut State, key_id: &str) -> KmsResult<&'a mut StoredKey> {
        let resolved = Self::resolve_key_id(state, key_id).ok_or_else(|| Self::not_found(key_id))?;
        state
            .keys
            .get_mut(&resolved)
            .ok_or_else(|| Self::not_found(key_id))
    }
}

#[async_trait]
impl KmsApi for InMemoryKms {
    async fn describe_key(&self, key_id: &str) -> KmsResult<KeyMetadata> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::DescribeKey {
                key_id: key_id.to_string(),
            },
        )?;
        Ok(Self::key_mut(&mut state, key_id)?.metadata.clone())
    }

    async fn create_key(&self, input: CreateKeyInput) -> KmsResult<KeyMetadata> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::CreateKey {
                tags: input.tags.clone(),
            },
        )?;
        let key_id = Uuid::new_v4().to_string();
        let arn = self.key_arn(&self.region, &key_id);
        let multi_region = input.multi_region.unwrap_or(false);
        let origin = input.origin.unwrap_or_else(|| "AWS_KMS".to_string());
        let metadata = KeyMetadata {
            aws_account_id: Some(self.account_id.clone()),
            arn: Some(arn.clone()),
            creation_date: Some(Utc::now()),
            custom_key_store_id: input.custom_key_store_id,
            description: Some(input.description.unwrap_or_default()),
            enabled: Some(origin != "EXTERNAL"),
            key_id: key_id.clone(),
            key_manager: Some("CUSTOMER".to_string()),
            key_spec: Some(
                input
                    .key_spec
                    .unwrap_or_else(|| "SYMMETRIC_DEFAULT".to_string()),
            ),
            key_state: Some(if origin == "EXTERNAL" {
                KeyState::PendingImport
            } else {
                KeyState::Enabled
            }),
            key_usage: Some(
                input
                    .key_usage
                    .unwrap_or_else(|| "ENCRYPT_DECRYPT".to_string()),
            ),
            multi_region: Some(multi_region),
            multi_region_configuration: multi_region.then(|| MultiRegionTopology {
                multi_region_key_type: Some("PRIMARY".to_string()),
                primary_key: Some(MultiRegionKeyRef {
                    arn: Some(arn.clone()),
                    region: Some(self.region.clone()),
                }),
                replica_keys: Vec::new(),
            }),
            origin: Some(origin),
            ..KeyMetadata::default()
        };
        state.keys.insert(
            key_id,
            StoredKey {
                metadata: metadata.clone(),
                rotation_enabled: false,
                policy: input.policy,
                tags: TagMapping::from(input.tags),
            },
        );
        Ok(metadata)
    }

    async fn replicate_key(&self, input: ReplicateKeyInput) -> KmsResult<KeyMetadata> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::ReplicateKey {
                key_id: input.key_id.clone(),
                replica_region: input.replica_region.clone(),
            },
        )?;
        let primary = Self::key_mut(&mut state, &input.key_id)?.metadata.clone();
        if primary.multi_region != Some(true) {
            return Err(KmsError::api(
                "UnsupportedOperationException",
                format!("{} is not a multi-Region key", input.key_id),
            ));
        }
        let replica_arn = self.key_arn(&input.replica_region, &primary.key_id);
        let primary_ref = MultiRegionKeyRef {
            arn: primary.arn.clone(),
            region: Some(self.region.clone()),
        };
        let replica_ref = MultiRegionKeyRef {
            arn: Some(replica_arn.clone()),
            region: Some(input.replica_region.clone()),
        };
        if let Some(topology) = Self::key_mut(&mut state, &input.key_id)?
            .metadata
            .multi_region_configuration
            .as_mut()
        {
            topology.replica_keys.push(replica_ref.clone());
        }
        // Replicas share the primary's key id; they are stored under their ARN.
        let metadata = KeyMetadata {
            arn: Some(replica_arn.clone()),
            creation_date: Some(Utc::now()),
            description: Some(input.description.unwrap_or_default()),
            key_id: replica_arn.clone(),
            key_state: Some(KeyState::Enabled),
            multi_region_configuration: Some(MultiRegionTopology {
                multi_region_key_type: Some("REPLICA".to_string()),
                primary_key: Some(primary_ref),
                replica_keys: vec![replica_ref],
            }),
            ..primary
        };
        state.keys.insert(
            replica_arn,
            StoredKey {
                metadata: metadata.clone(),
                rotation_enabled: false,
                policy: input.policy,
                tags: TagMapping::from(input.tags),
            },
        );
        Ok(metadata)
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        pending_window_in_days: i64,
    ) -> KmsResult<ScheduledDeletion> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::ScheduleKeyDeletion {
                key_id: key_id.to_string(),
                pending_window_in_days,
            },
        )?;
        let key = Self::key_mut(&mut state, key_id)?;
        if key
            .metadata
            .key_state
            .is_some_and(|state| state.is_pending_deletion())
        {
            return Err(KmsError::api(
                "KMSInvalidStateException",
                format!("{key_id} is pending deletion"),
            ));
        }
        let deletion_date = Utc::now() + Duration::days(pending_window_in_days);
        key.metadata.key_state = Some(KeyState::PendingDeletion);
        key.metadata.enabled = Some(false);
        key.metadata.deletion_date = Some(deletion_date);
        key.metadata.pending_deletion_window_in_days = Some(pending_window_in_days);
        Ok(ScheduledDeletion {
            key_id: key.metadata.key_id.clone(),
            key_state: key.metadata.key_state,
            deletion_date: Some(deletion_date),
            pending_window_in_days: Some(pending_window_in_days),
        })
    }

    async fn get_key_rotation_status(&self, key_id: &str) -> KmsResult<Option<bool>> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::GetKeyRotationStatus {
                key_id: key_id.to_string(),
            },
        )?;
        let unavailable = state.rotation_status_unavailable;
        let key = Self::key_mut(&mut state, key_id)?;
        Ok((!unavailable).then_some(key.rotation_enabled))
    }

    async fn enable_key_rotation(&self, key_id: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::EnableKeyRotation {
                key_id: key_id.to_string(),
            },
        )?;
        Self::key_mut(&mut state, key_id)?.rotation_enabled = true;
        Ok(())
    }

    async fn disable_key_rotation(&self, key_id: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::DisableKeyRotation {
                key_id: key_id.to_string(),
            },
        )?;
        Self::key_mut(&mut state, key_id)?.rotation_enabled = false;
        Ok(())
    }

    async fn get_key_policy(&self, key_id: &str, _policy_name: &str) -> KmsResult<Option<String>> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::GetKeyPolicy {
                key_id: key_id.to_string(),
            },
        )?;
        Ok(Self::key_mut(&mut state, key_id)?.policy.clone())
    }

    async fn put_key_policy(&self, input: PutKeyPolicyInput) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, KmsCall::PutKeyPolicy(input.clone()))?;
        Self::key_mut(&mut state, &input.key_id)?.policy = Some(input.policy);
        Ok(())
    }

    async fn list_resource_tags(
        &self,
        key_id: &str,
        marker: Option<String>,
    ) -> KmsResult<TagPage> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::ListResourceTags {
                key_id: key_id.to_string(),
                marker: marker.clone(),
            },
        )?;
        let tags = Self::key_mut(&mut state, key_id)?.tags.to_tags();
        let start = match marker {
            Some(marker) => marker.parse::<usize>().map_err(|_| {
                KmsError::api("InvalidMarkerException", format!("invalid marker {marker}"))
            })?,
            None => 0,
        };
        let end = self.page_end(start, tags.len());
        let truncated = end < tags.len();
        Ok(TagPage {
            tags: tags.get(start..end).map(<[Tag]>::to_vec).unwrap_or_default(),
            next_marker: truncated.then(|| end.to_string()),
            truncated,
        })
    }

    async fn tag_resource(&self, key_id: &str, tags: Vec<Tag>) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::TagResource {
                key_id: key_id.to_string(),
                tags: tags.clone(),
            },
        )?;
        let key = Self::key_mut(&mut state, key_id)?;
        for tag in tags {
            key.tags.insert(tag.tag_key, tag.tag_value);
        }
        Ok(())
    }

    async fn untag_resource(&self, key_id: &str, tag_keys: Vec<String>) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::UntagResource {
                key_id: key_id.to_string(),
                tag_keys: tag_keys.clone(),
            },
        )?;
        let key = Self::key_mut(&mut state, key_id)?;
        for tag_key in &tag_keys {
            key.tags.remove(tag_key);
        }
        Ok(())
    }

    async fn create_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::CreateAlias {
                alias_name: alias_name.to_string(),
                target_key_id: target_key_id.to_string(),
            },
        )?;
        if state.aliases.contains_key(alias_name) {
            return Err(KmsError::api(
                "AlreadyExistsException",
                format!("{alias_name} already exists"),
            ));
        }
        let target = Self::key_mut(&mut state, target_key_id)?.metadata.key_id.clone();
        let now = Utc::now();
        state.aliases.insert(
            alias_name.to_string(),
            StoredAlias {
                target_key_id: target,
                created: now,
                updated: now,
            },
        );
        Ok(())
    }

    async fn update_alias(&self, alias_name: &str, target_key_id: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::UpdateAlias {
                alias_name: alias_name.to_string(),
                target_key_id: target_key_id.to_string(),
            },
        )?;
        let target = Self::key_mut(&mut state, target_key_id)?.metadata.key_id.clone();
        let alias = state.aliases.get_mut(alias_name).ok_or_else(|| {
            KmsError::api(NOT_FOUND_CODE, format!("Alias {alias_name} does not exist"))
        })?;
        alias.target_key_id = target;
        alias.updated = Utc::now();
        Ok(())
    }

    async fn delete_alias(&self, alias_name: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::DeleteAlias {
                alias_name: alias_name.to_string(),
            },
        )?;
        state.aliases.remove(alias_name).map(|_| ()).ok_or_else(|| {
            KmsError::api(NOT_FOUND_CODE, format!("Alias {alias_name} does not exist"))
        })
    }

    async fn list_aliases(&self, marker: Option<String>) -> KmsResult<AliasPage> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::ListAliases {
                marker: marker.clone(),
            },
        )?;
        let start = marker.and_then(|m| m.parse::<usize>().ok()).unwrap_or(0);
        let all: Vec<AliasListEntry> = state
            .aliases
            .iter()
            .map(|(name, alias)| AliasListEntry {
                alias_name: name.clone(),
                alias_arn: Some(format!(
                    "arn:aws:kms:{}:{}:{name}",
                    self.region, self.account_id
                )),
                target_key_id: Some(alias.target_key_id.clone()),
                creation_date: Some(alias.created),
                last_updated_date: Some(alias.updated),
            })
            .collect();
        let end = self.page_end(start, all.len());
        let truncated = end < all.len();
        Ok(AliasPage {
            aliases: all.get(start..end).map(<[AliasListEntry]>::to_vec).unwrap_or_default(),
            next_marker: truncated.then(|| end.to_string()),
            truncated,
        })
    }

    async fn create_grant(&self, input: CreateGrantInput) -> KmsResult<CreatedGrant> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::CreateGrant {
                key_id: input.key_id.clone(),
                grantee_principal: input.grantee_principal.clone(),
                operations: input.operations.clone(),
            },
        )?;
        if input.operations.is_empty() {
            return Err(KmsError::api(
                "ValidationException",
                "at least one grant operation is required",
            ));
        }
        let key_id = Self::key_mut(&mut state, &input.key_id)?.metadata.key_id.clone();
        // Named grants are idempotent: the same name on the same key returns the existing grant.
        if let Some(existing) = input.name.as_ref().and_then(|name| {
            state
                .grants
                .values()
                .find(|grant| grant.key_id == key_id && grant.name.as_ref() == Some(name))
        }) {
            return Ok(CreatedGrant {
                grant_id: existing.grant_id.clone(),
                grant_token: Some(format!("token-{}", existing.grant_id)),
            });
        }
        let grant_id = Uuid::new_v4().simple().to_string();
        state.grants.insert(
            grant_id.clone(),
            GrantListEntry {
                grant_id: grant_id.clone(),
                key_id,
                name: input.name,
                grantee_principal: Some(input.grantee_principal),
                retiring_principal: input.retiring_principal,
                operations: input.operations,
                creation_date: Some(Utc::now()),
            },
        );
        Ok(CreatedGrant {
            grant_token: Some(format!("token-{grant_id}")),
            grant_id,
        })
    }

    async fn list_grants(&self, key_id: &str, marker: Option<String>) -> KmsResult<GrantPage> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::ListGrants {
                key_id: key_id.to_string(),
                marker: marker.clone(),
            },
        )?;
        let resolved = Self::key_mut(&mut state, key_id)?.metadata.key_id.clone();
        let all: Vec<GrantListEntry> = state
            .grants
            .values()
            .filter(|grant| grant.key_id == resolved)
            .cloned()
            .collect();
        let start = match marker {
            Some(marker) => marker.parse::<usize>().map_err(|_| {
                KmsError::api("InvalidMarkerException", format!("invalid marker {marker}"))
            })?,
            None => 0,
        };
        let end = self.page_end(start, all.len());
        let truncated = end < all.len();
        Ok(GrantPage {
            grants: all.get(start..end).map(<[GrantListEntry]>::to_vec).unwrap_or_default(),
            next_marker: truncated.then(|| end.to_string()),
            truncated,
        })
    }

    async fn retire_grant(&self, key_id: &str, grant_id: &str) -> KmsResult<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            KmsCall::RetireGrant {
                key_id: key_id.to_string(),
                grant_id: grant_id.to_string(),
            },
        )?;
        let resolved = Self::key_mut(&mut state, key_id)?.metadata.key_id.clone();
        match state.grants.get(grant_id) {
            Some(grant) if grant.key_id == resolved => {
                state.grants.remove(grant_id);
                Ok(())
            }
            _ => Err(KmsError::api(
                NOT_FOUND_CODE,
                format!("Grant {grant_id} does not exist"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tag_listing_is_paginated() {
        let kms = InMemoryKms::default().with_tag_page_size(2);
        let tags: TagMapping = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        kms.seed_key("k1", tags);

        let first = kms.list_resource_tags("k1", None).await.unwrap();
        assert_eq!(first.tags.len(), 2);
        assert!(first.truncated);
        let second = kms
            .list_resource_tags("k1", first.next_marker)
            .await
            .unwrap();
        assert_eq!(second.tags, vec![Tag::new("c", "3")]);
        assert!(!second.truncated);
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn oversized_marker_yields_an_empty_last_page() {
        let kms = InMemoryKms::default().with_tag_page_size(2);
        kms.seed_key("k1", [("a", "1")].into_iter().collect());
        kms.create_alias("alias/a", "k1").await.unwrap();
        let huge = Some(usize::MAX.to_string());

        let tags = kms.list_resource_tags("k1", huge.clone()).await.unwrap();
        assert!(tags.tags.is_empty());
        assert!(!tags.truncated);

        let aliases = kms.list_aliases(huge.clone()).await.unwrap();
        assert!(aliases.aliases.is_empty());
        assert!(!aliases.truncated);

        let grants = kms.list_grants("k1", huge).await.unwrap();
        assert!(grants.grants.is_empty());
    }

    #[tokio::test]
    async fn grants_are_listed_per_key_and_retired_once() {
        let kms = InMemoryKms::default().with_tag_page_size(1);
        kms.seed_key("k1", TagMapping::new());
        kms.seed_key("k2", TagMapping::new());
        let input = |key_id: &str, name: &str| CreateGrantInput {
            key_id: key_id.to_string(),
            grantee_principal: "arn:aws:iam::000000000000:role/app".to_string(),
            operations: vec!["Decrypt".to_string()],
            name: Some(name.to_string()),
            ..CreateGrantInput::default()
        };
        let first = kms.create_grant(input("k1", "one")).await.unwrap();
        kms.create_grant(input("k1", "two")).await.unwrap();
        kms.create_grant(input("k2", "one")).await.unwrap();
        let again = kms.create_grant(input("k1", "one")).await.unwrap();
        assert_eq!(again.grant_id, first.grant_id);

        let page = kms.list_grants("k1", None).await.unwrap();
        assert_eq!(page.grants.len(), 1);
        assert!(page.truncated);
        assert_eq!(kms.grants("k1").len(), 2);

        kms.retire_grant("k1", &first.grant_id).await.unwrap();
        let err = kms.retire_grant("k1", &first.grant_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let kms = InMemoryKms::default();
        kms.seed_key("k1", TagMapping::new());
        kms.fail_next("EnableKeyRotation", "LimitExceededException", "slow down");

        let err = kms.enable_key_rotation("k1").await.unwrap_err();
        assert_eq!(err.code(), Some("LimitExceededException"));
        kms.enable_key_rotation("k1").await.unwrap();
        assert_eq!(kms.rotation("k1"), Some(true));
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let kms = InMemoryKms::default();
        let err = kms.describe_key("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn scheduling_deletion_twice_is_rejected() {
        let kms = InMemoryKms::default();
        kms.seed_key("k1", TagMapping::new());
        kms.schedule_key_deletion("k1", 7).await.unwrap();
        assert_eq!(kms.key_state("k1"), Some(KeyState::PendingDeletion));
        let err = kms.schedule_key_deletion("k1", 7).await.unwrap_err();
        assert_eq!(err.code(), Some("KMSInvalidStateException"));
    }
}
