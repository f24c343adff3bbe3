use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_PROVIDER_URL: &str = "https://cloud-api.near.ai";
pub const DEFAULT_NRAS_URL: &str = "https://nras.attestation.nvidia.com/v3/attest/gpu";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3.1";

/// Setting name (as reported in `configMissing`) and its environment variable.
const SETTINGS: [(&str, &str); 12] = [
    ("providerUrl", "TESSERA_PROVIDER_URL"),
    ("providerApiKey", "TESSERA_PROVIDER_API_KEY"),
    ("nrasUrl", "TESSERA_NRAS_URL"),
    ("intelUrl", "TESSERA_INTEL_URL"),
    ("intelApiKey", "TESSERA_INTEL_API_KEY"),
    ("expectations", "TESSERA_EXPECTATIONS"),
    ("defaultModel", "TESSERA_DEFAULT_MODEL"),
    ("requestTimeoutMs", "TESSERA_REQUEST_TIMEOUT_MS"),
    ("retryAttempts", "TESSERA_RETRY_ATTEMPTS"),
    ("retryBaseMs", "TESSERA_RETRY_BASE_MS"),
    ("settleMs", "TESSERA_SETTLE_MS"),
    ("token", "TESSERA_TOKEN"),
];

/// Environment variable backing a setting name.
pub fn env_name(setting: &str) -> &'static str {
    SETTINGS
        .iter()
        .find(|(name, _)| *name == setting)
        .map(|(_, env)| *env)
        .unwrap_or("")
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider_url: String,
    pub provider_api_key: Option<String>,
    pub nras_url: String,
    pub intel_url: Option<String>,
    pub intel_api_key: Option<String>,
    pub expectations_path: Option<PathBuf>,
    pub default_model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Wait before the first fetch so fresh attestation data can propagate.
    pub settle_delay: Duration,
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.into(),
            provider_api_key: None,
            nras_url: DEFAULT_NRAS_URL.into(),
            intel_url: None,
            intel_api_key: None,
            expectations_path: None,
            default_model: DEFAULT_MODEL.into(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            settle_delay: Duration::ZERO,
            api_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |setting: &str| {
            lookup(env_name(setting))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |setting: &str| get(setting).and_then(|v| v.parse::<u64>().ok());

        let mut config = Self::default();
        if let Some(url) = get("providerUrl") {
            config.provider_url = url;
        }
        config.provider_api_key = get("providerApiKey");
        if let Some(url) = get("nrasUrl") {
            config.nras_url = url;
        }
        config.intel_url = get("intelUrl");
        config.intel_api_key = get("intelApiKey");
        config.expectations_path = get("expectations").map(PathBuf::from);
        if let Some(model) = get("defaultModel") {
            config.default_model = model;
        }
        if let Some(ms) = millis("requestTimeoutMs") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = get("retryAttempts").and_then(|v| v.parse::<u32>().ok()) {
            config.retry.max_attempts = n.max(1);
        }
        if let Some(ms) = millis("retryBaseMs") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = millis("settleMs") {
            config.settle_delay = Duration::from_millis(ms);
        }
        config.api_token = get("token");
        config
    }

    /// Required settings that are absent, keyed by setting name with the
    /// environment variable that supplies each.
    pub fn missing(&self) -> BTreeMap<String, String> {
        let mut missing = BTreeMap::new();
        if self.provider_api_key.is_none() {
            missing.insert("providerApiKey".into(), env_name("providerApiKey").into());
        }
        missing
    }

    /// CPU verification runs only with both an endpoint and a credential.
    pub fn intel_configured(&self) -> bool {
        self.intel_url.is_some() && self.intel_api_key.is_some()
    }
}
