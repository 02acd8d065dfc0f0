pub mod apis;
pub mod controller;
pub mod error;
pub mod kms;
pub mod reconciler;
pub mod resources;
pub mod telemetry;

mod config;

pub use config::{
    KmsBackend, AWS_ACCOUNT_ID, AWS_REGION, KMS_BACKEND, KMS_ENDPOINT, KMS_REQUEST_TIMEOUT,
    RECONCILE_TIMEOUT, REQUEUE_ON_ERROR, RESYNC_PERIOD, UNSETTLED_REQUEUE, WATCH_NAMESPACE,
};
