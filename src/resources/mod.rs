//! Resource managers, one per custom resource kind.

pub mod alias;
pub mod grant;
pub mod key;
pub mod replica_key;

use std::fmt::Debug;

use serde::Serialize;

use crate::apis::{Alias, Conditions, Grant, Key, ReplicaKey, ResourceMetadata};
use crate::reconciler::ResourceKind;

pub use alias::AliasManager;
pub use grant::GrantManager;
pub use key::KeyManager;
pub use replica_key::ReplicaKeyManager;

/// Custom resource the engine can reconcile.
pub trait KmsResource: Clone + Debug + Send + Sync + 'static {
    type Spec: Serialize + Clone + Send + Sync;

    const KIND: ResourceKind;

    fn spec(&self) -> &Self::Spec;

    fn conditions(&self) -> Option<&Conditions>;

    /// Creates an empty status on first use.
    fn conditions_mut(&mut self) -> &mut Conditions;

    /// Lifecycle state name while the remote resource is still moving on its own.
    fn unsettled_state(&self) -> Option<&'static str> {
        None
    }

    fn is_settled(&self) -> bool {
        self.unsettled_state().is_none()
    }
}

impl KmsResource for Key {
    type Spec = crate::apis::KeySpec;

    const KIND: ResourceKind = ResourceKind::Key;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|status| &status.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }

    fn unsettled_state(&self) -> Option<&'static str> {
        self.status
            .as_ref()
            .and_then(|status| status.key_state)
            .filter(|state| state.is_transitional())
            .map(|state| state.as_str())
    }
}

impl KmsResource for ReplicaKey {
    type Spec = crate::apis::ReplicaKeySpec;

    const KIND: ResourceKind = ResourceKind::ReplicaKey;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|status| &status.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }

    fn unsettled_state(&self) -> Option<&'static str> {
        self.status
            .as_ref()
            .and_then(|status| status.replica_key_metadata.as_ref())
            .and_then(|metadata| metadata.key_state)
            .filter(|state| state.is_transitional())
            .map(|state| state.as_str())
    }
}

impl KmsResource for Alias {
    type Spec = crate::apis::AliasSpec;

    const KIND: ResourceKind = ResourceKind::Alias;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|status| &status.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl KmsResource for Grant {
    type Spec = crate::apis::GrantSpec;

    const KIND: ResourceKind = ResourceKind::Grant;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|status| &status.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

/// Region and owning account stamped into resource metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountScope {
    pub region: String,
    pub account_id: String,
}

impl AccountScope {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    pub fn resource_metadata(
        &self,
        arn: Option<String>,
        owner_account_id: Option<String>,
    ) -> ResourceMetadata {
        ResourceMetadata {
            arn,
            owner_account_id: Some(owner_account_id.unwrap_or_else(|| self.account_id.clone())),
            region: Some(self.region.clone()),
        }
    }
}

/// Observed value of an immutable optional field. An unset desired value means
/// "no preference", so the remote default is not reported as a change.
pub(crate) fn observed<T>(desired: &Option<T>, remote: Option<T>) -> Option<T> {
    desired.as_ref().and(remote)
}
