use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::proof::HardwareVerificationResult;
use tessera_core::report::IntelEvidence;
use tessera_verify::{jwt, tdx};

use crate::config::Config;
use crate::error::FetchError;
use crate::retry::with_timeout;

/// TCB levels accepted as trustworthy.
const ACCEPTED_TCB: [&str; 4] = [
    "UpToDate",
    "SWHardeningNeeded",
    "ConfigurationNeeded",
    "ConfigurationAndSWHardeningNeeded",
];
const TCB_CLAIMS: [&str; 2] = ["attester_tcb_status", "tcb_status"];

#[async_trait]
pub trait CpuVerifier: Send + Sync {
    async fn verify(
        &self,
        evidence: &IntelEvidence,
        expected_nonce: Option<&str>,
    ) -> Result<HardwareVerificationResult, FetchError>;
}

#[derive(Debug, Serialize)]
struct QuoteRequest {
    quote: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct IntelClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl IntelClient {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    /// Requires both an endpoint and a credential.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let url = config
            .intel_url
            .as_deref()
            .ok_or(FetchError::NotConfigured("intelUrl"))?;
        let key = config
            .intel_api_key
            .as_deref()
            .ok_or(FetchError::NotConfigured("intelApiKey"))?;
        Self::new(url, key, config.request_timeout)
    }
}

#[async_trait]
impl CpuVerifier for IntelClient {
    async fn verify(
        &self,
        evidence: &IntelEvidence,
        expected_nonce: Option<&str>,
    ) -> Result<HardwareVerificationResult, FetchError> {
        let Some(quote) = tdx::parse_quote(&evidence.quote) else {
            return Ok(HardwareVerificationResult::failed(
                "Intel quote could not be parsed",
            ));
        };
        let raw = decode_quote_bytes(&evidence.quote).unwrap_or_default();
        let body = QuoteRequest {
            quote: STANDARD.encode(raw),
        };

        let token: TokenResponse = with_timeout(self.timeout, "intel", async {
            let resp = self
                .client
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    what: "intel".into(),
                    status: status.as_u16(),
                    body: text,
                });
            }
            resp.json::<TokenResponse>().await.map_err(FetchError::from)
        })
        .await?;

        Ok(evaluate(&token.token, &quote, expected_nonce))
    }
}

fn decode_quote_bytes(quote: &str) -> Option<Vec<u8>> {
    let q = quote.trim();
    hex::decode(q.strip_prefix("0x").unwrap_or(q))
        .ok()
        .or_else(|| STANDARD.decode(q).ok())
}

/// Judge the appraisal token together with the nonce bound into the quote.
pub fn evaluate(
    token: &str,
    quote: &tdx::QuoteReportData,
    expected_nonce: Option<&str>,
) -> HardwareVerificationResult {
    let claims = jwt::decode(token);
    let mut result = HardwareVerificationResult::passed(
        claims.clone(),
        Some(Value::String(token.to_string())),
    );

    match claims
        .as_ref()
        .and_then(|c| TCB_CLAIMS.iter().find_map(|k| c.get(*k)))
        .and_then(Value::as_str)
    {
        None => result.reject("Intel appraisal token carries no TCB status"),
        Some(status) if !ACCEPTED_TCB.contains(&status) => {
            result.reject(format!("Intel TCB status {status}"));
        }
        Some(_) => {}
    }

    if let Some(expected) = expected_nonce {
        let bound = quote.nonce_hex();
        let expected = expected.trim().trim_start_matches("0x");
        if !bound.eq_ignore_ascii_case(expected) {
            tracing::warn!(bound, expected, "TDX report_data nonce mismatch");
            result.reject("Intel nonce mismatch");
        }
    }
    result
}
