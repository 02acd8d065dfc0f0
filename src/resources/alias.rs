use std::sync::Arc;

use async_trait::async_trait;

use super::AccountScope;
use crate::apis::{Alias, AliasStatus};
use crate::error::{ReconcileError, ReconcileResult};
use crate::kms::{AliasListEntry, KmsApi};
use crate::reconciler::identity::ensure_alias_name;
use crate::reconciler::{Classification, PassContext, ResourceManager, UpdateResult};

const TARGET_KEY_PATH: &str = "Spec.TargetKeyID";

/// Whether a desired target (id, ARN or alias-qualified ARN) names the key id
/// the service reports.
fn same_target(desired: &str, remote: &str) -> bool {
    desired == remote || desired.ends_with(&format!("/{remote}"))
}

/// key: kms-alias-manager
pub struct AliasManager {
    kms: Arc<dyn KmsApi>,
    scope: AccountScope,
}

impl AliasManager {
    pub fn new(kms: Arc<dyn KmsApi>, scope: AccountScope) -> Self {
        Self { kms, scope }
    }

    async fn find(&self, ctx: &PassContext, alias_name: &str) -> ReconcileResult<Option<AliasListEntry>> {
        let mut marker: Option<String> = None;
        loop {
            let page = ctx
                .call(
                    "READ_MANY",
                    "ListAliases",
                    self.kms.list_aliases(marker.take()),
                )
                .await?;
            if let Some(entry) = page
                .aliases
                .into_iter()
                .find(|entry| entry.alias_name == alias_name)
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

    fn target<'a>(&self, resource: &'a Alias) -> ReconcileResult<&'a str> {
        resource
            .spec
            .target_key_id
            .as_deref()
            .filter(|target| !target.is_empty())
            .ok_or_else(|| ReconcileError::terminal("targetKeyID is required"))
    }
}

#[async_trait]
impl ResourceManager for AliasManager {
    type Resource = Alias;

    async fn read_one(&self, ctx: &PassContext, resource: &Alias) -> ReconcileResult<Alias> {
        let alias_name = ensure_alias_name(&resource.spec.name);
        let entry = self
            .find(ctx, &alias_name)
            .await?
            .ok_or(ReconcileError::NotFound)?;

        let mut latest = resource.clone();
        latest.spec.target_key_id = match (&resource.spec.target_key_id, entry.target_key_id) {
            (Some(desired), Some(remote)) if same_target(desired, &remote) => Some(desired.clone()),
            (_, remote) => remote,
        };
        let status = latest.status.get_or_insert_with(AliasStatus::default);
        status.ack_resource_metadata = Some(self.scope.resource_metadata(entry.alias_arn, None));
        status.creation_date = entry.creation_date;
        status.last_updated_date = entry.last_updated_date;
        Ok(latest)
    }

    async fn create(&self, ctx: &PassContext, desired: &Alias) -> UpdateResult<Alias> {
        let alias_name = ensure_alias_name(&desired.spec.name);
        let target = self.target(desired)?;
        ctx.call(
            "CREATE",
            "CreateAlias",
            self.kms.create_alias(&alias_name, target),
        )
        .await?;
        tracing::info!(%alias_name, target_key_id = %target, "alias created");

        let mut created = desired.clone();
        let status = created.status.get_or_insert_with(AliasStatus::default);
        status.ack_resource_metadata = Some(self.scope.resource_metadata(
            Some(format!(
                "arn:aws:kms:{}:{}:{alias_name}",
                self.scope.region, self.scope.account_id
            )),
            None,
        ));
        Ok(created)
    }

    async fn update(
        &self,
        ctx: &PassContext,
        desired: &Alias,
        latest: &Alias,
        classification: &Classification,
    ) -> UpdateResult<Alias> {
        if let Some(error) = classification.terminal_error() {
            return Err(error.into());
        }
        let mut updated = latest.clone();
        if classification.delta.different_at(TARGET_KEY_PATH) {
            let alias_name = ensure_alias_name(&desired.spec.name);
            let target = self.target(desired)?;
            ctx.call(
                "UPDATE",
                "UpdateAlias",
                self.kms.update_alias(&alias_name, target),
            )
            .await?;
            tracing::info!(%alias_name, target_key_id = %target, "alias retargeted");
        }
        updated.spec = desired.spec.clone();
        Ok(updated)
    }

    async fn delete(&self, ctx: &PassContext, resource: &Alias) -> ReconcileResult<()> {
        let alias_name = ensure_alias_name(&resource.spec.name);
        match ctx
            .call("DELETE", "DeleteAlias", self.kms.delete_alias(&alias_name))
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}
