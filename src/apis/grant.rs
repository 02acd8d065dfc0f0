use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, Conditions, ResourceMetadata};

/// Encryption-context conditions a grant is limited to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantConstraints {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encryption_context_equals: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encryption_context_subset: BTreeMap<String, String>,
}

/// key: kms-grant-spec
/// Permission for a principal to use a key for the listed operations. Grants are
/// create-and-retire only.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kms.keyops.dev",
    version = "v1alpha1",
    kind = "Grant",
    namespaced,
    status = "GrantStatus",
    derive = "PartialEq",
    shortname = "kmsgrant",
    printcolumn = r#"{"name":"GRANT-ID","type":"string","jsonPath":".status.grantID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GrantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<GrantConstraints>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_tokens: Vec<String>,
    pub grantee_principal: String,
    #[serde(default, rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retiring_principal: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_resource_metadata: Option<ResourceMetadata>,
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,
    #[serde(default, rename = "grantID", skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_token: Option<String>,
}
