//! Configuration for the EaaS provider.
//!
//! Everything is read from the process environment. The token and CA path
//! are captured once, when the entropy source is first built, and stay fixed
//! until the provider is finalized.

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

/// Bearer credential for the entropy service.
pub const ENV_TOKEN: &str = "EAAS_TOKEN";
/// Path of the PKCS#11 library every call is forwarded to.
pub const ENV_BASE_PROVIDER_PATH: &str = "BASE_PROVIDER_PATH";
/// Optional PEM bundle of trust roots for the entropy service.
pub const ENV_CA_CERT_PATH: &str = "CA_CERT_PATH";
/// Numeric syslog-style log threshold.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

pub const DEFAULT_ENDPOINT: &str = "https://api-eus.qrypt.com";

/// Largest request the service accepts in a single call.
pub const MAX_REQUEST_BYTES: usize = 512 * crate::entropy::KB;

/// Settings for the network entropy collector.
#[derive(Clone)]
pub struct EaasConfig {
    /// Scheme and host of the entropy service (e.g. "https://api-eus.qrypt.com").
    pub endpoint: String,

    /// Bearer token. Empty means unset.
    pub token: Zeroizing<String>,

    /// Extra trust root, in PEM form.
    pub ca_cert_path: Option<PathBuf>,

    /// Requests above this size are split into several calls.
    pub max_request_bytes: usize,

    pub retry: RetryPolicy,
}

impl EaasConfig {
    /// Reads the token and CA path from the environment.
    pub fn from_env() -> Self {
        Self {
            token: Zeroizing::new(std::env::var(ENV_TOKEN).unwrap_or_default()),
            ca_cert_path: non_empty_var(ENV_CA_CERT_PATH).map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}

impl Default for EaasConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from(DEFAULT_ENDPOINT),
            token: Zeroizing::new(String::new()),
            ca_cert_path: None,
            max_request_bytes: MAX_REQUEST_BYTES,
            retry: RetryPolicy::default(),
        }
    }
}

impl core::fmt::Debug for EaasConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EaasConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &if self.has_token() { "<redacted>" } else { "<unset>" })
            .field("ca_cert_path", &self.ca_cert_path)
            .field("max_request_bytes", &self.max_request_bytes)
            .field("retry", &self.retry)
            .finish()
    }
}

/// How often, and how patiently, a failed request is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,

    /// Pause after a rate-limited first attempt.
    pub first_backoff: Duration,

    /// Pause after any later rate-limited attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Pause before retrying a rate-limited `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.first_backoff
        } else {
            self.backoff
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_backoff: Duration::from_secs(2),
            backoff: Duration::from_secs(10),
        }
    }
}

/// `BASE_PROVIDER_PATH`, or `None` when unset or empty.
pub fn base_provider_path() -> Option<PathBuf> {
    non_empty_var(ENV_BASE_PROVIDER_PATH).map(PathBuf::from)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
