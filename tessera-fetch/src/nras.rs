//! GPU attestation through NVIDIA's remote attestation service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tessera_core::proof::{GpuExpectations, HardwareVerificationResult};
use tessera_core::report::{GpuEvidence, GpuPayload};
use tessera_verify::ClaimsValidator;
use tessera_verify::jwt;

use crate::error::FetchError;
use crate::retry::with_timeout;

const RIM_HASH_CLAIMS: [&str; 2] = ["x-nvidia-gpu-driver-rim-hash", "x-nvidia-gpu-vbios-rim-hash"];
const MEASUREMENTS_CLAIM: &str = "x-nvidia-measurements";

#[async_trait]
pub trait GpuVerifier: Send + Sync {
    /// Submit one evidence payload. `Err` means the verifier could not be
    /// reached; a reachable verifier that rejects the evidence yields
    /// `Ok` with `verified == false`.
    async fn verify(
        &self,
        payload: &GpuPayload,
        expected: &GpuExpectations,
        nonce: Option<&str>,
    ) -> Result<HardwareVerificationResult, FetchError>;
}

#[derive(Debug, Serialize)]
struct NrasRequest<'a> {
    nonce: &'a str,
    arch: &'a str,
    evidence_list: &'a [GpuEvidence],
    claims_version: &'static str,
}

pub struct NrasClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    validator: ClaimsValidator,
}

impl NrasClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build NRAS client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            validator: ClaimsValidator::nras(),
        })
    }
}

#[async_trait]
impl GpuVerifier for NrasClient {
    async fn verify(
        &self,
        payload: &GpuPayload,
        expected: &GpuExpectations,
        nonce: Option<&str>,
    ) -> Result<HardwareVerificationResult, FetchError> {
        let nonce = payload.nonce().or_else(|| nonce.map(str::to_string)).unwrap_or_default();
        let arch = payload
            .arch
            .as_deref()
            .or(expected.arch.as_deref())
            .unwrap_or_default();
        let body = NrasRequest {
            nonce: &nonce,
            arch,
            evidence_list: &payload.evidence_list,
            claims_version: "2.0",
        };

        let response: Value = with_timeout(self.timeout, "nras", async {
            let resp = self.client.post(&self.url).json(&body).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    what: "nras".into(),
                    status: status.as_u16(),
                    body: text,
                });
            }
            resp.json::<Value>().await.map_err(FetchError::from)
        })
        .await?;

        Ok(evaluate(&self.validator, &response, payload, expected))
    }
}

/// Split an NRAS response into the overall token and per-device tokens.
///
/// The service answers `[["JWT", "<overall>"], {"GPU-0": "<device>", ...}]`.
pub fn parse_response(response: &Value) -> Option<(String, Vec<(String, String)>)> {
    let items = response.as_array()?;
    let overall = items
        .iter()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("JWT"))
        .and_then(|pair| pair.get(1))
        .and_then(Value::as_str)?
        .to_string();
    let mut devices: Vec<(String, String)> = items
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|m| m.iter())
        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
        .collect();
    devices.sort();
    Some((overall, devices))
}

/// Judge an NRAS response against the expected hardware reference values.
pub fn evaluate(
    validator: &ClaimsValidator,
    response: &Value,
    payload: &GpuPayload,
    expected: &GpuExpectations,
) -> HardwareVerificationResult {
    let Some((overall, devices)) = parse_response(response) else {
        let mut r = HardwareVerificationResult::failed("NRAS response could not be parsed");
        r.raw = Some(response.clone());
        return r;
    };
    let claims = jwt::decode(&overall);
    let mut result = HardwareVerificationResult::passed(claims.clone(), Some(response.clone()));

    if claims.is_none() {
        result.reject("NRAS token could not be decoded");
    } else if !validator.verify(&overall) {
        result.reject("NRAS overall attestation result is not true");
    }

    if let (Some(want), Some(got)) = (expected.arch.as_deref(), payload.arch.as_deref()) {
        if !want.eq_ignore_ascii_case(got) {
            result.reject(format!("GPU architecture mismatch: expected {want}, got {got}"));
        }
    }

    if let Some(want) = expected.device_cert_hash.as_deref() {
        if !payload
            .evidence_list
            .iter()
            .any(|e| certificate_hash_matches(&e.certificate, want))
        {
            result.reject("Device certificate hash mismatch");
        }
    }

    if devices.is_empty() {
        result.reject("NRAS returned no device claims");
    }
    for (device, token) in &devices {
        let Some(device_claims) = jwt::decode(token) else {
            result.reject(format!("{device}: token could not be decoded"));
            continue;
        };
        for reason in check_device(&device_claims, expected) {
            result.reject(format!("{device}: {reason}"));
        }
    }

    if !result.verified {
        tracing::warn!(reasons = ?result.reasons, "GPU attestation rejected");
    }
    result
}

fn check_device(claims: &Value, expected: &GpuExpectations) -> Vec<String> {
    let mut reasons = Vec::new();
    let claim = |key: &str| claims.get(key).and_then(Value::as_str);

    if let Some(want) = expected.ueid.as_deref() {
        if !claim("ueid").is_some_and(|got| got.eq_ignore_ascii_case(want)) {
            reasons.push("UEID mismatch".to_string());
        }
    }
    if let Some(want) = expected.rim_hash.as_deref() {
        let matched = RIM_HASH_CLAIMS
            .iter()
            .filter_map(|k| claim(*k))
            .any(|got| got.eq_ignore_ascii_case(want));
        if !matched {
            reasons.push("RIM hash mismatch".to_string());
        }
    }
    if claim("measres").is_some_and(|m| m != "success") {
        reasons.push("Measurement check failed".to_string());
    }
    if let Some(reported) = claims.get(MEASUREMENTS_CLAIM).and_then(Value::as_array) {
        let reported: Vec<&str> = reported.iter().filter_map(Value::as_str).collect();
        for want in &expected.measurements {
            if !reported.iter().any(|got| got.eq_ignore_ascii_case(want)) {
                reasons.push(format!("Reference measurement {want} not reported"));
            }
        }
    }
    reasons
}

/// Compare sha256 of the certificate (decoded if base64, raw otherwise).
fn certificate_hash_matches(certificate: &str, expected_hex: &str) -> bool {
    let expected = expected_hex.trim().trim_start_matches("0x");
    let digest_of = |bytes: &[u8]| hex::encode(Sha256::digest(bytes));
    if let Ok(der) = STANDARD.decode(certificate.trim()) {
        if digest_of(&der).eq_ignore_ascii_case(expected) {
            return true;
        }
    }
    digest_of(certificate.as_bytes()).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::report::PayloadSource;

    const CERT: &str = "Y2VydGlmaWNhdGU="; // "certificate"

    fn expectations() -> GpuExpectations {
        GpuExpectations {
            arch: Some("HOPPER".into()),
            device_cert_hash: Some(hex::encode(Sha256::digest(b"certificate"))),
            rim_hash: Some("aa11".into()),
            ueid: Some("4242".into()),
            measurements: vec!["m1".into()],
        }
    }

    fn payload() -> GpuPayload {
        GpuPayload {
            source: PayloadSource::TopLevel,
            arch: Some("HOPPER".into()),
            evidence_list: vec![GpuEvidence {
                certificate: CERT.into(),
                evidence: "ZXZpZGVuY2U=".into(),
                arch: None,
            }],
            raw: json!({"nonce": "n1"}),
        }
    }

    fn response(overall_ok: bool, ueid: &str) -> Value {
        let overall = jwt::encode_unsigned(&json!({
            "iss": jwt::NRAS_ISSUER,
            "eat_nonce": "n1",
            (jwt::OVERALL_RESULT_CLAIM): overall_ok,
        }));
        let device = jwt::encode_unsigned(&json!({
            "ueid": ueid,
            "x-nvidia-gpu-driver-rim-hash": "AA11",
            "measres": "success",
            (MEASUREMENTS_CLAIM): ["m0", "m1"],
        }));
        json!([["JWT", overall], {"GPU-0": device}])
    }

    #[test]
    fn parses_nras_shape() {
        let (overall, devices) = parse_response(&response(true, "4242")).unwrap();
        assert_eq!(overall.split('.').count(), 3);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].0, "GPU-0");
        assert_eq!(parse_response(&json!({"not": "array"})), None);
        assert_eq!(parse_response(&json!([{"GPU-0": "x"}])), None);
    }

    #[test]
    fn matching_evidence_passes() {
        let r = evaluate(&ClaimsValidator::nras(), &response(true, "4242"), &payload(), &expectations());
        assert!(r.verified, "{:?}", r.reasons);
        assert_eq!(r.claim_str("eat_nonce"), Some("n1"));
    }

    #[test]
    fn overall_false_fails() {
        let r = evaluate(&ClaimsValidator::nras(), &response(false, "4242"), &payload(), &expectations());
        assert!(!r.verified);
        assert_eq!(r.reasons, vec!["NRAS overall attestation result is not true".to_string()]);
    }

    #[test]
    fn device_mismatches_are_reported() {
        let mut exp = expectations();
        exp.measurements.push("m9".into());
        exp.device_cert_hash = Some("00".into());
        let r = evaluate(&ClaimsValidator::nras(), &response(true, "9999"), &payload(), &exp);
        assert!(!r.verified);
        assert!(r.reasons.contains(&"Device certificate hash mismatch".to_string()));
        assert!(r.reasons.contains(&"GPU-0: UEID mismatch".to_string()));
        assert!(r.reasons.contains(&"GPU-0: Reference measurement m9 not reported".to_string()));
    }

    #[test]
    fn architecture_mismatch() {
        let mut exp = expectations();
        exp.arch = Some("BLACKWELL".into());
        let r = evaluate(&ClaimsValidator::nras(), &response(true, "4242"), &payload(), &exp);
        assert!(!r.verified);
        assert!(r.reasons[0].starts_with("GPU architecture mismatch"));
    }

    #[test]
    fn unparseable_response() {
        let r = evaluate(&ClaimsValidator::nras(), &json!("oops"), &payload(), &expectations());
        assert!(!r.verified);
        assert_eq!(r.raw, Some(json!("oops")));
    }

    #[test]
    fn certificate_hash_raw_fallback() {
        let raw_hash = hex::encode(Sha256::digest(b"not base64!"));
        assert!(certificate_hash_matches("not base64!", &raw_hash));
        assert!(!certificate_hash_matches("not base64!", "00"));
    }
}
