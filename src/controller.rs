use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{self, finalizer, Event as FinalizerEvent};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::apis::ConditionType;
use crate::config;
use crate::error::{PartialUpdate, ReconcileError};
use crate::reconciler::{PassContext, Reconciler, ResourceManager};
use crate::resources::KmsResource;

pub const FINALIZER: &str = "finalizers.kms.keyops.dev";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to encode status: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("resource has no namespace")]
    MissingNamespace,
}

/// Custom resource the controller can watch and patch.
pub trait WatchedResource:
    KmsResource
    + Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + DeserializeOwned
    + Serialize
{
}

impl<T> WatchedResource for T where
    T: KmsResource
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + DeserializeOwned
        + Serialize
{
}

/// When to look at a resource again after a pass. `None` waits for the next
/// spec change.
pub fn requeue_after(
    settled: bool,
    err: Option<&ReconcileError>,
    terminal_codes: &[&str],
) -> Option<Duration> {
    match err {
        Some(err) if err.is_terminal_for(terminal_codes) => None,
        Some(_) => Some(*config::REQUEUE_ON_ERROR),
        None if !settled => Some(*config::UNSETTLED_REQUEUE),
        None => Some(*config::RESYNC_PERIOD),
    }
}

pub struct ControllerContext<M> {
    client: Client,
    reconciler: Reconciler<M>,
    shutdown: CancellationToken,
}

impl<M> ControllerContext<M>
where
    M: ResourceManager + 'static,
    M::Resource: WatchedResource,
{
    pub fn new(client: Client, manager: M, shutdown: CancellationToken) -> Self {
        Self {
            client,
            reconciler: Reconciler::new(manager),
            shutdown,
        }
    }

    fn pass_context(&self) -> PassContext {
        PassContext::with_cancellation(self.shutdown.child_token())
            .with_timeout(*config::RECONCILE_TIMEOUT)
    }

    async fn apply(
        &self,
        api: &Api<M::Resource>,
        resource: &M::Resource,
    ) -> Result<Action, ControllerError> {
        let pass = self.pass_context();
        let (mut observed, err) = match self.reconciler.reconcile(&pass, resource).await {
            Ok(updated) => (updated, None),
            Err(PartialUpdate {
                resource: partial,
                error,
            }) => (partial.unwrap_or_else(|| resource.clone()), Some(error)),
        };
        self.reconciler.record_outcome(&mut observed, err.as_ref());
        self.persist_status(api, &observed).await?;

        if let Some(error) = &err {
            let terminal = observed
                .conditions()
                .and_then(|conditions| conditions.get(ConditionType::Terminal))
                .is_some_and(|condition| condition.is_true());
            tracing::warn!(
                kind = %M::Resource::KIND,
                name = %resource.name_any(),
                terminal,
                %error,
                "reconciliation failed"
            );
        }
        let terminal_codes = M::Resource::KIND.profile().terminal_codes;
        Ok(
            match requeue_after(observed.is_settled(), err.as_ref(), terminal_codes) {
                Some(delay) => Action::requeue(delay),
                None => Action::await_change(),
            },
        )
    }

    async fn cleanup(&self, resource: &M::Resource) -> Result<Action, ControllerError> {
        let pass = self.pass_context();
        self.reconciler.finalize(&pass, resource).await?;
        tracing::info!(
            kind = %M::Resource::KIND,
            name = %resource.name_any(),
            "remote resource released"
        );
        Ok(Action::await_change())
    }

    async fn persist_status(
        &self,
        api: &Api<M::Resource>,
        resource: &M::Resource,
    ) -> Result<(), ControllerError> {
        let value = serde_json::to_value(resource)?;
        let status = value.get("status").cloned().unwrap_or(Value::Null);
        let patch = json!({ "status": status });
        api.patch_status(
            &resource.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

async fn reconcile<M>(
    resource: Arc<M::Resource>,
    ctx: Arc<ControllerContext<M>>,
) -> Result<Action, ControllerError>
where
    M: ResourceManager + 'static,
    M::Resource: WatchedResource,
{
    let namespace = resource
        .namespace()
        .ok_or(ControllerError::MissingNamespace)?;
    let api: Api<M::Resource> = Api::namespaced(ctx.client.clone(), &namespace);
    let handler_api = api.clone();
    finalizer(&api, FINALIZER, resource, |event| async move {
        match event {
            FinalizerEvent::Apply(resource) => ctx.apply(&handler_api, &resource).await,
            FinalizerEvent::Cleanup(resource) => ctx.cleanup(&resource).await,
        }
    })
    .await
    .map_err(|err| ControllerError::Finalizer(Box::new(err)))
}

fn error_policy<M>(
    resource: Arc<M::Resource>,
    error: &ControllerError,
    _ctx: Arc<ControllerContext<M>>,
) -> Action
where
    M: ResourceManager + 'static,
    M::Resource: WatchedResource,
{
    tracing::warn!(
        kind = %M::Resource::KIND,
        name = %resource.name_any(),
        %error,
        "controller error"
    );
    Action::requeue(*config::REQUEUE_ON_ERROR)
}

/// Watches one kind until shutdown.
pub async fn run<M>(client: Client, manager: M, shutdown: CancellationToken)
where
    M: ResourceManager + 'static,
    M::Resource: WatchedResource,
{
    let api: Api<M::Resource> = match config::WATCH_NAMESPACE.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let context = Arc::new(ControllerContext::new(client, manager, shutdown));
    tracing::info!(kind = %M::Resource::KIND, "starting controller");

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<M>, error_policy::<M>, context)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(object = %object.name, ?action, "reconciled")
                }
                Err(error) => tracing::warn!(%error, "reconcile loop error"),
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KmsError;

    const CODES: &[&str] = &["TagException"];

    #[test]
    fn terminal_errors_wait_for_a_spec_change() {
        let err = ReconcileError::terminal("Immutable Spec fields have been modified: Spec.Origin");
        assert_eq!(requeue_after(true, Some(&err), CODES), None);
        let err = ReconcileError::from(KmsError::api("TagException", "bad"));
        assert_eq!(requeue_after(true, Some(&err), CODES), None);
    }

    #[test]
    fn recoverable_and_converged_passes_requeue() {
        let err = ReconcileError::Cancelled;
        assert_eq!(
            requeue_after(true, Some(&err), CODES),
            Some(Duration::from_secs(30))
        );
        assert_eq!(requeue_after(false, None, CODES), Some(Duration::from_secs(15)));
        assert_eq!(
            requeue_after(true, None, CODES),
            Some(Duration::from_secs(36_000))
        );
    }
}
