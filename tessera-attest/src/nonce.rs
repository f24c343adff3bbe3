use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_core::proof::{HardwareVerificationResult, NonceCheck};
use tessera_core::report::NormalizedReport;
use tessera_verify::jwt::NONCE_CLAIM;
use tessera_verify::tdx;

/// Where an attested nonce was read from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NonceSource {
    NrasClaims,
    GpuPayload,
    IntelQuote,
}

impl fmt::Display for NonceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NrasClaims => "NRAS claims",
            Self::GpuPayload => "GPU payload",
            Self::IntelQuote => "Intel quote",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedNonce {
    pub value: String,
    pub source: NonceSource,
}

/// Pick the nonce the hardware evidence attests to.
///
/// NRAS claims win (they were verified upstream), then any NVIDIA payload,
/// then the Intel evidence: first the provider's declared `request_nonce`,
/// then the nonce half of the quote's report_data.
pub fn extract_nonce(
    report: Option<&NormalizedReport>,
    gpu: Option<&HardwareVerificationResult>,
) -> Option<AttestedNonce> {
    if let Some(value) = nras_nonce(gpu) {
        return Some(AttestedNonce {
            value,
            source: NonceSource::NrasClaims,
        });
    }
    let report = report?;
    if let Some(value) = report.gpu_payloads.iter().find_map(|p| p.nonce()) {
        return Some(AttestedNonce {
            value,
            source: NonceSource::GpuPayload,
        });
    }
    let intel = report.intel.as_ref()?;
    let value = intel
        .request_nonce
        .clone()
        .or_else(|| tdx::parse_quote(&intel.quote).map(|rd| rd.nonce_hex()))?;
    Some(AttestedNonce {
        value,
        source: NonceSource::IntelQuote,
    })
}

/// Nonce asserted by the NRAS overall claims, if any.
pub fn nras_nonce(gpu: Option<&HardwareVerificationResult>) -> Option<String> {
    let gpu = gpu?;
    gpu.claim_str(NONCE_CLAIM)
        .or_else(|| gpu.claim_str("nonce"))
        .map(str::to_string)
}

/// Bind attested evidence to the session's expected nonce.
///
/// Valid only when `attested` equals `expected` and, if present, `nras` does
/// too. Comparison ignores case and surrounding whitespace. With no expected
/// nonce the check is still recorded, always invalid.
pub fn bind(expected: Option<&str>, attested: Option<&str>, nras: Option<&str>) -> NonceCheck {
    let valid = match (expected, attested) {
        (Some(e), Some(a)) => {
            nonce_eq(e, a) && nras.is_none_or(|n| nonce_eq(e, n)) && !e.trim().is_empty()
        }
        _ => false,
    };
    NonceCheck {
        expected: expected.map(str::to_string),
        attested: attested.map(str::to_string),
        nras: nras.map(str::to_string),
        valid,
    }
}

pub fn nonce_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// When a session nonce may be replaced by the attested one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NonceResyncPolicy {
    /// A mismatch always stays a mismatch.
    Never,
    /// Re-sync when the attested nonce comes from hardware evidence that
    /// verified and agrees with the NRAS claim.
    #[default]
    VerifiedEvidence,
}

impl NonceResyncPolicy {
    /// The nonce to re-sync the session to, if this policy allows it.
    pub fn resync_target(
        &self,
        expected: Option<&str>,
        attested: Option<&AttestedNonce>,
        nras: Option<&str>,
        evidence_verified: bool,
    ) -> Option<String> {
        if *self == Self::Never || !evidence_verified {
            return None;
        }
        let expected = expected?;
        let attested = attested?;
        if nonce_eq(expected, &attested.value) {
            return None;
        }
        if nras.is_some_and(|n| !nonce_eq(n, &attested.value)) {
            return None;
        }
        Some(attested.value.clone())
    }
}
