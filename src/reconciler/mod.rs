//! Diff-driven reconciliation engine.
//!
//! A pass reads the remote resource, classifies the spec delta against the
//! kind table, dispatches the mutable sub-reconcilers in a fixed order, and
//! folds the outcome into the resource's conditions.

pub mod conditions;
pub mod context;
pub mod delta;
pub mod dispatch;
pub mod identity;
pub mod key_policy;
pub mod mutability;
pub mod rotation;
pub mod tags;

use async_trait::async_trait;

use crate::error::{PartialUpdate, ReconcileError, ReconcileResult};
use crate::resources::KmsResource;

pub use context::PassContext;
pub use delta::{Delta, Difference};
pub use dispatch::{DispatchOutcome, TagStrategy, UpdateDispatcher, UpdateStep, UpdateTarget};
pub use mutability::{classify, Classification, KindProfile, ResourceKind, UpdatePolicy};

pub type UpdateResult<R> = Result<R, PartialUpdate<R>>;

/// key: resource-manager
/// Remote operations for one resource kind.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    type Resource: KmsResource;

    /// Latest observed state, or [`ReconcileError::NotFound`] when the resource
    /// has not been created yet.
    async fn read_one(
        &self,
        ctx: &PassContext,
        resource: &Self::Resource,
    ) -> ReconcileResult<Self::Resource>;

    async fn create(
        &self,
        ctx: &PassContext,
        desired: &Self::Resource,
    ) -> UpdateResult<Self::Resource>;

    async fn update(
        &self,
        ctx: &PassContext,
        desired: &Self::Resource,
        latest: &Self::Resource,
        classification: &Classification,
    ) -> UpdateResult<Self::Resource>;

    async fn delete(&self, ctx: &PassContext, resource: &Self::Resource) -> ReconcileResult<()>;

    fn classify(
        &self,
        desired: &Self::Resource,
        latest: &Self::Resource,
    ) -> ReconcileResult<Classification> {
        let delta = Delta::between(desired.spec(), latest.spec())?;
        Ok(classify(Self::Resource::KIND, delta))
    }

    fn update_conditions(
        &self,
        resource: &mut Self::Resource,
        err: Option<&ReconcileError>,
    ) -> bool {
        conditions::update_conditions(
            resource.conditions_mut(),
            err,
            Self::Resource::KIND.profile().terminal_codes,
        )
    }
}

/// Entry points the controller drives for one kind.
pub struct Reconciler<M> {
    manager: M,
}

impl<M: ResourceManager> Reconciler<M> {
    pub fn new(manager: M) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Converges `latest` toward `desired`. An empty delta issues no calls.
    pub async fn sync(
        &self,
        ctx: &PassContext,
        desired: &M::Resource,
        latest: &M::Resource,
    ) -> UpdateResult<M::Resource> {
        let classification = self.manager.classify(desired, latest)?;
        if classification.delta.is_empty() {
            return Ok(latest.clone());
        }
        tracing::info!(
            kind = %M::Resource::KIND,
            fields = ?classification.delta.paths().collect::<Vec<_>>(),
            "spec delta detected"
        );
        self.manager
            .update(ctx, desired, latest, &classification)
            .await
    }

    /// Reads the remote resource, creating it when absent and syncing otherwise.
    pub async fn reconcile(
        &self,
        ctx: &PassContext,
        desired: &M::Resource,
    ) -> UpdateResult<M::Resource> {
        match self.manager.read_one(ctx, desired).await {
            Ok(latest) => self.sync(ctx, desired, &latest).await,
            Err(err) if err.is_not_found() => {
                tracing::info!(kind = %M::Resource::KIND, "creating remote resource");
                self.manager.create(ctx, desired).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the remote resource. Absence counts as already deleted.
    pub async fn finalize(&self, ctx: &PassContext, resource: &M::Resource) -> ReconcileResult<()> {
        match self.manager.read_one(ctx, resource).await {
            Ok(latest) => self.manager.delete(ctx, &latest).await,
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Status merge entry point. Returns the updated resource only when it now
    /// carries at least one condition.
    pub fn update_conditions(
        &self,
        resource: &M::Resource,
        err: Option<&ReconcileError>,
    ) -> Option<M::Resource> {
        let mut updated = resource.clone();
        self.manager
            .update_conditions(&mut updated, err)
            .then_some(updated)
    }

    /// Folds a pass outcome into `resource`, including `Synced`.
    pub fn record_outcome(&self, resource: &mut M::Resource, err: Option<&ReconcileError>) {
        self.manager.update_conditions(resource, err);
        let (synced, message) = match (err, resource.unsettled_state()) {
            (Some(err), _) => (false, Some(err.to_string())),
            (None, Some(state)) => (false, Some(format!("resource is {state}"))),
            (None, None) => (true, None),
        };
        conditions::set_synced(resource.conditions_mut(), synced, message);
    }
}
