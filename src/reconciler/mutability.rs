use std::fmt;

use super::delta::Delta;
use crate::error::ReconcileError;

/// Remote error codes that no retry can fix, shared by key-shaped kinds.
const KEY_TERMINAL_CODES: &[&str] = &[
    "MalformedPolicyDocumentException",
    "TagException",
    "UnsupportedOperationException",
    "InvalidArnException",
];

const REPLICA_KEY_TERMINAL_CODES: &[&str] = &[
    "MalformedPolicyDocumentException",
    "TagException",
    "UnsupportedOperationException",
    "InvalidArnException",
    "AlreadyExistsException",
];

const ALIAS_TERMINAL_CODES: &[&str] = &["AlreadyExistsException", "InvalidAliasNameException"];

const GRANT_TERMINAL_CODES: &[&str] = &[
    "InvalidArnException",
    "InvalidGrantTokenException",
    "UnsupportedOperationException",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Key,
    ReplicaKey,
    Alias,
    Grant,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Key => "Key",
            ResourceKind::ReplicaKey => "ReplicaKey",
            ResourceKind::Alias => "Alias",
            ResourceKind::Grant => "Grant",
        }
    }

    pub fn profile(&self) -> &'static KindProfile {
        match self {
            ResourceKind::Key => &KEY_PROFILE,
            ResourceKind::ReplicaKey => &REPLICA_KEY_PROFILE,
            ResourceKind::Alias => &ALIAS_PROFILE,
            ResourceKind::Grant => &GRANT_PROFILE,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a kind allows to change after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Only these field paths may change.
    AllowList(&'static [&'static str]),
    /// No field may change; the message is reported verbatim.
    Unsupported(&'static str),
}

/// key: kind-table
/// One row per resource kind.
#[derive(Debug, PartialEq, Eq)]
pub struct KindProfile {
    pub kind: ResourceKind,
    pub updates: UpdatePolicy,
    pub terminal_codes: &'static [&'static str],
}

static KEY_PROFILE: KindProfile = KindProfile {
    kind: ResourceKind::Key,
    updates: UpdatePolicy::AllowList(&[
        "Spec.Policy",
        "Spec.Tags",
        "Spec.EnableKeyRotation",
        "Spec.BypassPolicyLockoutSafetyCheck",
    ]),
    terminal_codes: KEY_TERMINAL_CODES,
};

static REPLICA_KEY_PROFILE: KindProfile = KindProfile {
    kind: ResourceKind::ReplicaKey,
    updates: UpdatePolicy::Unsupported("replica key resource does not support updates"),
    terminal_codes: REPLICA_KEY_TERMINAL_CODES,
};

static ALIAS_PROFILE: KindProfile = KindProfile {
    kind: ResourceKind::Alias,
    updates: UpdatePolicy::AllowList(&["Spec.TargetKeyID"]),
    terminal_codes: ALIAS_TERMINAL_CODES,
};

static GRANT_PROFILE: KindProfile = KindProfile {
    kind: ResourceKind::Grant,
    updates: UpdatePolicy::Unsupported("grant resource does not support updates"),
    terminal_codes: GRANT_TERMINAL_CODES,
};

impl KindProfile {
    pub fn is_mutable(&self, path: &str) -> bool {
        match self.updates {
            UpdatePolicy::AllowList(paths) => paths.contains(&path),
            UpdatePolicy::Unsupported(_) => false,
        }
    }
}

/// A delta together with the verdict on whether it can be applied in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub delta: Delta,
    pub unsupported: Vec<String>,
    terminal_message: Option<String>,
}

impl Classification {
    pub fn has_unsupported_change(&self) -> bool {
        self.terminal_message.is_some()
    }

    /// The terminal error to report instead of applying the delta, if any.
    pub fn terminal_error(&self) -> Option<ReconcileError> {
        self.terminal_message
            .as_ref()
            .map(|message| ReconcileError::terminal(message.clone()))
    }
}

pub fn classify(kind: ResourceKind, delta: Delta) -> Classification {
    let profile = kind.profile();
    let unsupported: Vec<String> = delta
        .paths()
        .filter(|path| !profile.is_mutable(path))
        .map(str::to_string)
        .collect();
    let terminal_message = match profile.updates {
        _ if unsupported.is_empty() => None,
        UpdatePolicy::Unsupported(message) => Some(message.to_string()),
        UpdatePolicy::AllowList(_) => Some(format!(
            "Immutable Spec fields have been modified: {}",
            unsupported.join(",")
        )),
    };
    Classification {
        delta,
        unsupported,
        terminal_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(desired: serde_json::Value, latest: serde_json::Value) -> Delta {
        Delta::between_values(&desired, &latest)
    }

    #[test]
    fn key_allow_list_accepts_mutable_fields() {
        let classification = classify(
            ResourceKind::Key,
            delta(
                json!({"policy": "{}", "enableKeyRotation": true}),
                json!({"policy": "{\"a\":1}"}),
            ),
        );
        assert!(!classification.has_unsupported_change());
        assert!(classification.terminal_error().is_none());
    }

    #[test]
    fn every_immutable_key_field_is_named() {
        let classification = classify(
            ResourceKind::Key,
            delta(
                json!({"keySpec": "RSA_2048", "origin": "EXTERNAL", "tags": [{"tagKey": "a"}]}),
                json!({"keySpec": "SYMMETRIC_DEFAULT", "origin": "AWS_KMS"}),
            ),
        );
        assert_eq!(classification.unsupported, vec!["Spec.KeySpec", "Spec.Origin"]);
        let message = classification.terminal_error().unwrap().to_string();
        assert_eq!(
            message,
            "Immutable Spec fields have been modified: Spec.KeySpec,Spec.Origin"
        );
    }

    #[test]
    fn replica_key_rejects_any_change() {
        let classification = classify(
            ResourceKind::ReplicaKey,
            delta(json!({"description": "b"}), json!({"description": "a"})),
        );
        assert_eq!(
            classification.terminal_error().unwrap().to_string(),
            "replica key resource does not support updates"
        );
    }

    #[test]
    fn empty_delta_is_never_terminal() {
        let classification = classify(ResourceKind::ReplicaKey, Delta::default());
        assert!(!classification.has_unsupported_change());
    }

    #[test]
    fn alias_name_is_immutable() {
        let classification = classify(
            ResourceKind::Alias,
            delta(
                json!({"name": "alias/b", "targetKeyID": "k2"}),
                json!({"name": "alias/a", "targetKeyID": "k1"}),
            ),
        );
        assert_eq!(classification.unsupported, vec!["Spec.Name"]);
        assert!(ResourceKind::Alias.profile().is_mutable("Spec.TargetKeyID"));
    }

    #[test]
    fn grant_rejects_any_change() {
        let classification = classify(
            ResourceKind::Grant,
            delta(
                json!({"operations": ["Decrypt"]}),
                json!({"operations": ["Encrypt", "Decrypt"]}),
            ),
        );
        assert_eq!(classification.unsupported, vec!["Spec.Operations"]);
        assert_eq!(
            classification.terminal_error().unwrap().to_string(),
            "grant resource does not support updates"
        );
        assert!(ResourceKind::Grant
            .profile()
            .terminal_codes
            .contains(&"InvalidGrantTokenException"));
    }
}
