pub mod config;
pub mod error;
pub mod expectations;
pub mod intel;
pub mod nras;
pub mod provider;
pub mod retry;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use config::Config;
pub use error::FetchError;
pub use expectations::ExpectationStore;
pub use intel::{CpuVerifier, IntelClient};
pub use nras::{GpuVerifier, NrasClient};
pub use provider::{ProofArtifacts, ProofSource, ProviderClient, fetch_artifacts};
pub use retry::RetryPolicy;

/// The outbound collaborators a verification run talks to.
pub struct Fetchers {
    pub source: Arc<dyn ProofSource>,
    pub gpu: Arc<dyn GpuVerifier>,
    /// Present only when both the Intel endpoint and credential are set.
    pub cpu: Option<Arc<dyn CpuVerifier>>,
    pub expectations: Option<ExpectationStore>,
}

impl Fetchers {
    /// A missing provider key is not an error here; the engine reports it
    /// per request through `Config::missing`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.provider_api_key.as_deref().unwrap_or_default();
        let source = ProviderClient::new(&config.provider_url, api_key, config.request_timeout)?;
        let gpu = NrasClient::new(&config.nras_url, config.request_timeout)?;

        let cpu: Option<Arc<dyn CpuVerifier>> = match IntelClient::from_config(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(FetchError::NotConfigured(setting)) => {
                tracing::debug!(setting, "CPU verification disabled");
                None
            }
            Err(e) => return Err(e).context("failed to build Intel client"),
        };

        let expectations = config
            .expectations_path
            .as_deref()
            .map(|path| {
                ExpectationStore::load(path)
                    .with_context(|| format!("failed to load expectations from {}", path.display()))
            })
            .transpose()?;

        Ok(Self {
            source: Arc::new(source),
            gpu: Arc::new(gpu),
            cpu,
            expectations,
        })
    }
}
