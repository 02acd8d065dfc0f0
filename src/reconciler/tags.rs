use crate::apis::TagMapping;
use crate::error::ReconcileResult;
use crate::kms::KmsApi;

use super::context::PassContext;

/// Keys present remotely but absent from the desired mapping, in key order.
pub fn removed_tag_keys(latest: &TagMapping, desired: &TagMapping) -> Vec<String> {
    latest
        .keys()
        .filter(|key| !desired.contains_key(key))
        .map(str::to_string)
        .collect()
}

/// key: tag-set-reconciler
/// Converges the remote tag set of one key to a desired mapping.
pub struct TagSetReconciler<'a> {
    kms: &'a dyn KmsApi,
    ctx: &'a PassContext,
}

impl<'a> TagSetReconciler<'a> {
    pub fn new(kms: &'a dyn KmsApi, ctx: &'a PassContext) -> Self {
        Self { kms, ctx }
    }

    /// Follows the continuation marker until the last page. Any page failure
    /// fails the whole listing.
    pub async fn list(&self, key_id: &str) -> ReconcileResult<TagMapping> {
        let mut tags = TagMapping::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .ctx
                .call(
                    "READ_MANY",
                    "ListResourceTags",
                    self.kms.list_resource_tags(key_id, marker.take()),
                )
                .await?;
            for tag in page.tags {
                tags.insert(tag.tag_key, tag.tag_value);
            }
            if !page.truncated {
                break;
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => {
                    tracing::warn!(%key_id, "tag listing truncated without a marker");
                    break;
                }
            }
            self.ctx.ensure_active()?;
        }
        Ok(tags)
    }

    /// Removes stale keys first, then tags with the full desired mapping. The
    /// tag call is skipped only when the desired set is empty.
    pub async fn reconcile(&self, key_id: &str, desired: &TagMapping) -> ReconcileResult<()> {
        let latest = self.list(key_id).await?;
        let to_remove = removed_tag_keys(&latest, desired);
        if !to_remove.is_empty() {
            tracing::debug!(%key_id, removed = ?to_remove, "untagging key");
            self.ctx
                .call(
                    "UPDATE",
                    "UntagResource",
                    self.kms.untag_resource(key_id, to_remove),
                )
                .await?;
        }
        self.apply(key_id, desired).await
    }

    /// Additive tagging only. Used right after creation where no stale tags can exist.
    pub async fn apply(&self, key_id: &str, desired: &TagMapping) -> ReconcileResult<()> {
        if desired.is_empty() {
            return Ok(());
        }
        self.ctx
            .call(
                "UPDATE",
                "TagResource",
                self.kms.tag_resource(key_id, desired.to_tags()),
            )
            .await
    }
}
