use serde::{Deserialize, Serialize};

/// Transcript signature as returned by the provider's signature endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePayload {
    /// The canonical string that was signed, normally `requestHash:responseHash`.
    pub text: String,
    pub signature: String,
    pub signing_address: String,
    #[serde(default = "default_signing_algo")]
    pub signing_algo: String,
}

fn default_signing_algo() -> String {
    "ecdsa".into()
}

/// Outcome of one external hardware verifier call (NRAS for GPU, Intel for CPU).
///
/// `None` in place of this struct means the verifier never ran because no
/// evidence was present; `Some` with `verified == false` means evidence was
/// present and failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareVerificationResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    pub reasons: Vec<String>,
}

impl HardwareVerificationResult {
    pub fn passed(claims: Option<serde_json::Value>, raw: Option<serde_json::Value>) -> Self {
        Self {
            verified: true,
            claims,
            raw,
            reasons: Vec::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            claims: None,
            raw: None,
            reasons: vec![reason.into()],
        }
    }

    /// Record a failure reason and clear the verified flag.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.verified = false;
        self.reasons.push(reason.into());
    }

    /// Look up a string claim from the decoded overall claims.
    pub fn claim_str(&self, key: &str) -> Option<&str> {
        self.claims
            .as_ref()?
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// Comparison of the session's expected nonce against what the hardware attested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceCheck {
    pub expected: Option<String>,
    pub attested: Option<String>,
    /// Nonce claimed by the NRAS token, when it differs in source from `attested`.
    pub nras: Option<String>,
    pub valid: bool,
}

/// Reference values a GPU must match, keyed per model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuExpectations {
    pub arch: Option<String>,
    pub device_cert_hash: Option<String>,
    pub rim_hash: Option<String>,
    pub ueid: Option<String>,
    #[serde(default)]
    pub measurements: Vec<String>,
}

impl GpuExpectations {
    /// The GPU verifier only runs once every expectation is known.
    pub fn is_complete(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.arch)
            && present(&self.device_cert_hash)
            && present(&self.rim_hash)
            && present(&self.ueid)
            && !self.measurements.is_empty()
    }

    /// Fill fields that are still unset from `other`. Set fields are kept.
    pub fn fill_missing(&mut self, other: &GpuExpectations) {
        fn fill(slot: &mut Option<String>, from: &Option<String>) {
            if slot.as_deref().is_none_or(|s| s.trim().is_empty()) {
                if let Some(v) = from {
                    *slot = Some(v.clone());
                }
            }
        }
        fill(&mut self.arch, &other.arch);
        fill(&mut self.device_cert_hash, &other.device_cert_hash);
        fill(&mut self.rim_hash, &other.rim_hash);
        fill(&mut self.ueid, &other.ueid);
        if self.measurements.is_empty() {
            self.measurements = other.measurements.clone();
        }
    }

    /// Names of the expectation fields that are still missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let absent = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        if absent(&self.arch) {
            missing.push("expectedArch");
        }
        if absent(&self.device_cert_hash) {
            missing.push("expectedDeviceCertHash");
        }
        if absent(&self.rim_hash) {
            missing.push("expectedRimHash");
        }
        if absent(&self.ueid) {
            missing.push("expectedUeid");
        }
        if self.measurements.is_empty() {
            missing.push("expectedMeasurements");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> GpuExpectations {
        GpuExpectations {
            arch: Some("HOPPER".into()),
            device_cert_hash: Some("aa".into()),
            rim_hash: Some("bb".into()),
            ueid: Some("cc".into()),
            measurements: vec!["dd".into()],
        }
    }

    #[test]
    fn signature_payload_from_provider_json() {
        let json = r#"{"text":"a:b","signature":"0x01","signing_address":"0xabc"}"#;
        let sig: SignaturePayload = serde_json::from_str(json).unwrap();
        assert_eq!(sig.signing_algo, "ecdsa");
        assert_eq!(sig.text, "a:b");
    }

    #[test]
    fn expectations_completeness() {
        assert!(full().is_complete());
        let mut partial = full();
        partial.ueid = Some("  ".into());
        assert!(!partial.is_complete());
        assert_eq!(partial.missing_fields(), vec!["expectedUeid"]);
        assert_eq!(GpuExpectations::default().missing_fields().len(), 5);
    }

    #[test]
    fn fill_missing_keeps_request_values() {
        let mut req = GpuExpectations {
            arch: Some("BLACKWELL".into()),
            ..Default::default()
        };
        req.fill_missing(&full());
        assert_eq!(req.arch.as_deref(), Some("BLACKWELL"));
        assert_eq!(req.ueid.as_deref(), Some("cc"));
        assert!(req.is_complete());
    }

    #[test]
    fn hardware_result_reject_clears_flag() {
        let mut r = HardwareVerificationResult::passed(None, None);
        r.reject("UEID mismatch");
        assert!(!r.verified);
        assert_eq!(r.reasons, vec!["UEID mismatch".to_string()]);
    }

    #[test]
    fn claim_lookup_ignores_empty() {
        let r = HardwareVerificationResult::passed(
            Some(serde_json::json!({"eat_nonce": "", "iss": "nras"})),
            None,
        );
        assert_eq!(r.claim_str("eat_nonce"), None);
        assert_eq!(r.claim_str("iss"), Some("nras"));
    }
}
