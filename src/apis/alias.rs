use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, Conditions, ResourceMetadata};

/// key: kms-alias-spec
/// Friendly name pointing at a key. `name` may be given with or without the
/// `alias/` prefix.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kms.keyops.dev",
    version = "v1alpha1",
    kind = "Alias",
    namespaced,
    status = "AliasStatus",
    derive = "PartialEq",
    shortname = "kmsalias"
)]
#[serde(rename_all = "camelCase")]
pub struct AliasSpec {
    pub name: String,
    #[serde(default, rename = "targetKeyID", skip_serializing_if = "Option::is_none")]
    pub target_key_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AliasStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_resource_metadata: Option<ResourceMetadata>,
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_date: Option<DateTime<Utc>>,
}
