use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tessera_core::proof::SignaturePayload;
use tessera_core::report::AttestationReport;

use crate::error::FetchError;
use crate::retry::{RetryPolicy, with_retry, with_timeout};

const USER_AGENT: &str = concat!("tessera/", env!("CARGO_PKG_VERSION"));
const SIGNING_ALGO: &str = "ecdsa";

/// Source of the two proof artifacts the inference provider publishes.
#[async_trait]
pub trait ProofSource: Send + Sync {
    async fn attestation_report(
        &self,
        model: &str,
        nonce: Option<&str>,
    ) -> Result<AttestationReport, FetchError>;

    async fn signature(&self, message_id: &str, model: &str)
    -> Result<SignaturePayload, FetchError>;
}

/// HTTP client for the provider's attestation and signature endpoints.
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            USER_AGENT.parse().context("invalid user agent")?,
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {api_key}")
                .parse()
                .context("invalid provider API key")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn report_url(&self) -> String {
        format!("{}/v1/attestation/report", self.base_url)
    }

    pub fn signature_url(&self, message_id: &str) -> String {
        format!("{}/v1/signature/{message_id}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        with_timeout(self.timeout, what, async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    what: what.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }
            resp.json::<T>().await.map_err(FetchError::from)
        })
        .await
    }
}

#[async_trait]
impl ProofSource for ProviderClient {
    async fn attestation_report(
        &self,
        model: &str,
        nonce: Option<&str>,
    ) -> Result<AttestationReport, FetchError> {
        let mut query = vec![("model", model), ("signing_algo", SIGNING_ALGO)];
        if let Some(n) = nonce {
            query.push(("nonce", n));
        }
        let url = self.report_url();
        self.get_json("attestation report", &url, &query).await
    }

    async fn signature(
        &self,
        message_id: &str,
        model: &str,
    ) -> Result<SignaturePayload, FetchError> {
        let url = self.signature_url(message_id);
        self.get_json(
            "signature",
            &url,
            &[("model", model), ("signing_algo", SIGNING_ALGO)],
        )
        .await
    }
}

/// Results of fetching both artifacts. Either side may have failed on its own.
#[derive(Debug)]
pub struct ProofArtifacts {
    pub report: Result<AttestationReport, FetchError>,
    pub signature: Result<SignaturePayload, FetchError>,
}

impl ProofArtifacts {
    /// The first timeout among the two fetches, if any.
    pub fn timeout(&self) -> Option<&FetchError> {
        [self.report.as_ref().err(), self.signature.as_ref().err()]
            .into_iter()
            .flatten()
            .find(|e| e.is_timeout())
    }

    pub fn nothing_available(&self) -> bool {
        self.report.is_err() && self.signature.is_err()
    }
}

/// Fetch the report and the signature concurrently, each under its own retry.
pub async fn fetch_artifacts(
    source: &dyn ProofSource,
    policy: &RetryPolicy,
    message_id: &str,
    model: &str,
    nonce: Option<&str>,
) -> ProofArtifacts {
    let report = with_retry(policy, "attestation report", || {
        source.attestation_report(model, nonce)
    });
    let signature = with_retry(policy, "signature", || source.signature(message_id, model));
    let (report, signature) = tokio::join!(report, signature);
    ProofArtifacts { report, signature }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        report_calls: AtomicU32,
        signature_calls: AtomicU32,
        report_failures: u32,
        signature_timeout: bool,
    }

    #[async_trait]
    impl ProofSource for Flaky {
        async fn attestation_report(
            &self,
            _model: &str,
            nonce: Option<&str>,
        ) -> Result<AttestationReport, FetchError> {
            let n = self.report_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.report_failures {
                return Err(FetchError::Network("reset".into()));
            }
            Ok(AttestationReport(json!({ "request_nonce": nonce })))
        }

        async fn signature(
            &self,
            message_id: &str,
            _model: &str,
        ) -> Result<SignaturePayload, FetchError> {
            self.signature_calls.fetch_add(1, Ordering::SeqCst);
            if self.signature_timeout {
                return Err(FetchError::Timeout {
                    what: "signature".into(),
                    after: Duration::from_secs(10),
                });
            }
            Ok(SignaturePayload {
                text: message_id.into(),
                signature: String::new(),
                signing_address: String::new(),
                signing_algo: "ecdsa".into(),
            })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn fetches_both_with_independent_retry() {
        let source = Flaky {
            report_calls: AtomicU32::new(0),
            signature_calls: AtomicU32::new(0),
            report_failures: 2,
            signature_timeout: true,
        };
        let artifacts = fetch_artifacts(&source, &policy(), "chat-1", "m", Some("n1")).await;
        assert_eq!(artifacts.report.as_ref().unwrap().0["request_nonce"], "n1");
        assert_eq!(source.report_calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.signature_calls.load(Ordering::SeqCst), 1);
        assert!(artifacts.timeout().is_some());
        assert!(!artifacts.nothing_available());
    }

    #[tokio::test]
    async fn both_missing_is_reported() {
        let source = Flaky {
            report_calls: AtomicU32::new(0),
            signature_calls: AtomicU32::new(0),
            report_failures: 10,
            signature_timeout: true,
        };
        let artifacts = fetch_artifacts(&source, &policy(), "chat-1", "m", None).await;
        assert!(artifacts.nothing_available());
    }

    #[test]
    fn urls_are_built_from_base() {
        let client =
            ProviderClient::new("https://api.example/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(client.report_url(), "https://api.example/v1/attestation/report");
        assert_eq!(client.signature_url("chat-9"), "https://api.example/v1/signature/chat-9");
    }
}
