use once_cell::sync::Lazy;
use std::time::Duration;

/// Which key-management backend the controller talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KmsBackend {
    Http,
    Memory,
}

impl KmsBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            KmsBackend::Http => "http",
            KmsBackend::Memory => "memory",
        }
    }
}

fn parse_kms_backend() -> KmsBackend {
    match std::env::var("KMS_BACKEND") {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "" | "http" => KmsBackend::Http,
                "memory" => KmsBackend::Memory,
                other => panic!(
                    "unsupported KMS_BACKEND value '{other}'; expected 'http' or 'memory'"
                ),
            }
        }
        Err(_) => KmsBackend::Http,
    }
}

/// Backend selection. Defaults to `http`; an unknown value aborts startup.
pub static KMS_BACKEND: Lazy<KmsBackend> = Lazy::new(parse_kms_backend);

/// Base URL of the key-management endpoint. Defaults to the regional public endpoint.
pub static KMS_ENDPOINT: Lazy<String> = Lazy::new(|| {
    read_optional_env("KMS_ENDPOINT")
        .unwrap_or_else(|| format!("https://kms.{}.amazonaws.com", AWS_REGION.as_str()))
});

/// Region reported in resource metadata. Defaults to `us-west-2`.
pub static AWS_REGION: Lazy<String> =
    Lazy::new(|| read_optional_env("AWS_REGION").unwrap_or_else(|| "us-west-2".to_string()));

/// Account id reported as the owner of managed resources.
pub static AWS_ACCOUNT_ID: Lazy<String> = Lazy::new(|| {
    read_optional_env("AWS_ACCOUNT_ID").unwrap_or_else(|| "000000000000".to_string())
});

/// key: kms-config -> per-request HTTP timeout
pub static KMS_REQUEST_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(read_secs("KMS_REQUEST_TIMEOUT_SECS", 30)));

/// key: kms-config -> upper bound on a single reconciliation pass
pub static RECONCILE_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(read_secs("RECONCILE_TIMEOUT_SECS", 120)));

/// Requeue interval for converged resources.
pub static RESYNC_PERIOD: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(read_secs("RESYNC_PERIOD_SECS", 36_000)));

/// Requeue interval after a recoverable failure.
pub static REQUEUE_ON_ERROR: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(read_secs("REQUEUE_ON_ERROR_SECS", 30)));

/// Requeue interval while the remote lifecycle state is still moving.
pub static UNSETTLED_REQUEUE: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(read_secs("UNSETTLED_REQUEUE_SECS", 15)));

/// Restricts the watch to one namespace when set; otherwise all namespaces are watched.
pub static WATCH_NAMESPACE: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("WATCH_NAMESPACE"));

fn read_secs(key: &str, default_value: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
