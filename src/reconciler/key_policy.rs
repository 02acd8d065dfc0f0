use serde_json::Value;

use crate::error::ReconcileResult;
use crate::kms::{KmsApi, PutKeyPolicyInput};

use super::context::PassContext;

/// The only policy name the service accepts.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Two documents are equivalent when they parse to the same JSON value, or are
/// byte-identical when either does not parse.
pub fn policies_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub struct PolicyUpdater<'a> {
    kms: &'a dyn KmsApi,
    ctx: &'a PassContext,
}

impl<'a> PolicyUpdater<'a> {
    pub fn new(kms: &'a dyn KmsApi, ctx: &'a PassContext) -> Self {
        Self { kms, ctx }
    }

    /// Pushes the full document unconditionally.
    pub async fn put(
        &self,
        key_id: &str,
        policy: &str,
        bypass_policy_lockout_safety_check: Option<bool>,
    ) -> ReconcileResult<()> {
        let input = PutKeyPolicyInput {
            key_id: key_id.to_string(),
            policy_name: DEFAULT_POLICY_NAME.to_string(),
            policy: policy.to_string(),
            bypass_policy_lockout_safety_check: bypass_policy_lockout_safety_check
                .unwrap_or(false),
        };
        self.ctx
            .call("UPDATE", "PutKeyPolicy", self.kms.put_key_policy(input))
            .await
    }

    pub async fn get(&self, key_id: &str) -> ReconcileResult<Option<String>> {
        self.ctx
            .call(
                "READ_ONE",
                "GetKeyPolicy",
                self.kms.get_key_policy(key_id, DEFAULT_POLICY_NAME),
            )
            .await
    }
}
