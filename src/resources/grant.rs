use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{observed, AccountScope};
use crate::apis::{Grant, GrantStatus};
use crate::error::{ReconcileError, ReconcileResult};
use crate::kms::{CreateGrantInput, GrantListEntry, KmsApi};
use crate::reconciler::{Classification, PassContext, ResourceManager, UpdateResult};

const UPDATE_UNSUPPORTED: &str = "grant resource does not support updates";

/// Grant operations compare as a set.
fn same_operations(desired: &[String], remote: &[String]) -> bool {
    desired.iter().collect::<BTreeSet<_>>() == remote.iter().collect::<BTreeSet<_>>()
}

/// key: kms-grant-manager
/// Grants a principal the use of a key. Grants are create-and-retire only.
pub struct GrantManager {
    kms: Arc<dyn KmsApi>,
    scope: AccountScope,
}

impl GrantManager {
    pub fn new(kms: Arc<dyn KmsApi>, scope: AccountScope) -> Self {
        Self { kms, scope }
    }

    fn key_id<'a>(&self, resource: &'a Grant) -> ReconcileResult<&'a str> {
        resource
            .spec
            .key_id
            .as_deref()
            .filter(|key_id| !key_id.is_empty())
            .ok_or_else(|| ReconcileError::terminal("keyID is required"))
    }

    async fn find(
        &self,
        ctx: &PassContext,
        key_id: &str,
        grant_id: &str,
    ) -> ReconcileResult<Option<GrantListEntry>> {
        let mut marker: Option<String> = None;
        loop {
            let page = ctx
                .call(
                    "READ_MANY",
                    "ListGrants",
                    self.kms.list_grants(key_id, marker.take()),
                )
                .await?;
            if let Some(entry) = page
                .grants
                .into_iter()
                .find(|entry| entry.grant_id == grant_id)
            {
                return Ok(Some(entry));
            }
            match page.next_marker {
                Some(next) if page.truncated => marker = Some(next),
                _ => return Ok(None),
            }
            ctx.ensure_active()?;
        }
    }

    fn grant_arn(&self, key_id: &str) -> String {
        if key_id.starts_with("arn:") {
            key_id.to_string()
        } else {
            format!(
                "arn:aws:kms:{}:{}:key/{key_id}",
                self.scope.region, self.scope.account_id
            )
        }
    }
}

#[async_trait]
impl ResourceManager for GrantManager {
    type Resource = Grant;

    /// Looks the grant up by the id recorded in status among the grants of its key.
    async fn read_one(&self, ctx: &PassContext, resource: &Grant) -> ReconcileResult<Grant> {
        let grant_id = resource
            .status
            .as_ref()
            .and_then(|status| status.grant_id.clone())
            .ok_or(ReconcileError::NotFound)?;
        let key_id = self.key_id(resource)?;
        let entry = match self.find(ctx, key_id, &grant_id).await {
            Err(err) if err.is_not_found() => return Err(ReconcileError::NotFound),
            other => other?.ok_or(ReconcileError::NotFound)?,
        };

        let mut latest = resource.clone();
        let spec = &mut latest.spec;
        if !same_operations(&resource.spec.operations, &entry.operations) {
            spec.operations = entry.operations;
        }
        if let Some(grantee) = entry.grantee_principal {
            spec.grantee_principal = grantee;
        }
        spec.retiring_principal = observed(&resource.spec.retiring_principal, entry.retiring_principal);
        spec.name = observed(&resource.spec.name, entry.name);
        let status = latest.status.get_or_insert_with(GrantStatus::default);
        if status.ack_resource_metadata.is_none() {
            status.ack_resource_metadata =
                Some(self.scope.resource_metadata(Some(self.grant_arn(key_id)), None));
        }
        Ok(latest)
    }

    async fn create(&self, ctx: &PassContext, desired: &Grant) -> UpdateResult<Grant> {
        let spec = &desired.spec;
        let key_id = self.key_id(desired)?;
        let constraints = spec.constraints.clone().unwrap_or_default();
        let input = CreateGrantInput {
            key_id: key_id.to_string(),
            grantee_principal: spec.grantee_principal.clone(),
            operations: spec.operations.clone(),
            retiring_principal: spec.retiring_principal.clone(),
            name: spec.name.clone(),
            grant_tokens: spec.grant_tokens.clone(),
            encryption_context_equals: constraints.encryption_context_equals,
            encryption_context_subset: constraints.encryption_context_subset,
        };
        let grant = ctx
            .call("CREATE", "CreateGrant", self.kms.create_grant(input))
            .await?;
        tracing::info!(%key_id, grant_id = %grant.grant_id, "grant created");

        let mut created = desired.clone();
        let status = created.status.get_or_insert_with(GrantStatus::default);
        status.ack_resource_metadata =
            Some(self.scope.resource_metadata(Some(self.grant_arn(key_id)), None));
        status.grant_id = Some(grant.grant_id);
        status.grant_token = grant.grant_token;
        Ok(created)
    }

    async fn update(
        &self,
        _ctx: &PassContext,
        _desired: &Grant,
        _latest: &Grant,
        classification: &Classification,
    ) -> UpdateResult<Grant> {
        let error = classification
            .terminal_error()
            .unwrap_or_else(|| ReconcileError::terminal(UPDATE_UNSUPPORTED));
        Err(error.into())
    }

    async fn delete(&self, ctx: &PassContext, resource: &Grant) -> ReconcileResult<()> {
        let grant_id = resource
            .status
            .as_ref()
            .and_then(|status| status.grant_id.as_deref())
            .ok_or(ReconcileError::NotFound)?;
        let key_id = self.key_id(resource)?;
        match ctx
            .call(
                "DELETE",
                "RetireGrant",
                self.kms.retire_grant(key_id, grant_id),
            )
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => {
                other?;
                tracing::info!(%key_id, %grant_id, "grant retired");
                Ok(())
            }
        }
    }
}
