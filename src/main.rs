use std::sync::Arc;

use kms_controller::controller;
use kms_controller::kms::{HttpKmsClient, InMemoryKms, KmsApi};
use kms_controller::resources::{
    AccountScope, AliasManager, GrantManager, KeyManager, ReplicaKeyManager,
};
use kms_controller::{
    KmsBackend, AWS_ACCOUNT_ID, AWS_REGION, KMS_BACKEND, KMS_ENDPOINT, KMS_REQUEST_TIMEOUT,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let kms: Arc<dyn KmsApi> = match *KMS_BACKEND {
        KmsBackend::Http => Arc::new(HttpKmsClient::new(
            KMS_ENDPOINT.as_str(),
            *KMS_REQUEST_TIMEOUT,
        )?),
        KmsBackend::Memory => {
            tracing::warn!("using the in-memory key service; state is lost on restart");
            Arc::new(InMemoryKms::new(AWS_REGION.as_str(), AWS_ACCOUNT_ID.as_str()))
        }
    };
    tracing::info!(
        backend = KMS_BACKEND.as_str(),
        region = %AWS_REGION.as_str(),
        "kms controller starting"
    );

    let client = kube::Client::try_default().await?;
    let scope = AccountScope::new(AWS_REGION.as_str(), AWS_ACCOUNT_ID.as_str());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, cancelling in-flight passes");
            signal_token.cancel();
        }
    });

    tokio::join!(
        controller::run(
            client.clone(),
            KeyManager::new(kms.clone(), scope.clone()),
            shutdown.clone(),
        ),
        controller::run(
            client.clone(),
            ReplicaKeyManager::new(kms.clone()),
            shutdown.clone(),
        ),
        controller::run(
            client.clone(),
            AliasManager::new(kms.clone(), scope.clone()),
            shutdown.clone(),
        ),
        controller::run(client, GrantManager::new(kms, scope), shutdown),
    );
    Ok(())
}
