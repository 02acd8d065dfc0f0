//! Custom resource definitions for keys, replica keys, aliases and grants.

pub mod alias;
pub mod common;
pub mod grant;
pub mod key;
pub mod replica_key;

pub use alias::{Alias, AliasSpec, AliasStatus};
pub use common::{
    Condition, ConditionStatus, ConditionType, Conditions, MultiRegionConfiguration,
    MultiRegionKey, ResourceMetadata, Tag, TagMapping,
};
pub use grant::{Grant, GrantConstraints, GrantSpec, GrantStatus};
pub use key::{Key, KeySpec, KeyState, KeyStatus};
pub use replica_key::{ReplicaKey, ReplicaKeyMetadata, ReplicaKeySpec, ReplicaKeyStatus};

pub const GROUP: &str = "kms.keyops.dev";
pub const VERSION: &str = "v1alpha1";

/// Annotation overriding the pending window (in days) used when a key is scheduled
/// for deletion.
pub const ANNOTATION_DELETE_PENDING_WINDOW: &str =
    "kms.keyops.dev/deletion-pending-window-in-days";
