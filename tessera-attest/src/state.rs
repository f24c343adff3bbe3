//! Verification state derivation.
//!
//! [`derive`] folds every independent facet of a proof (hashes, signature,
//! signer address, attestation summary, nonce binding, GPU and CPU hardware
//! results) into one [`VerificationState`]. It is a pure function: no I/O, no
//! clock, no shared state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_core::hashes::text_contains_hash;
use tessera_core::proof::{HardwareVerificationResult, NonceCheck, SignaturePayload};
use tessera_core::report::{NormalizedReport, normalize_address};
use tessera_verify::SignatureVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Hash,
    Signature,
    Address,
    Attestation,
    Nonce,
    Gpu,
    Cpu,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Hash,
        StepKind::Signature,
        StepKind::Address,
        StepKind::Attestation,
        StepKind::Nonce,
        StepKind::Gpu,
        StepKind::Cpu,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStep {
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl VerificationStep {
    fn new(status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Success, message)
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Error, message)
    }

    fn pending(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Pending, message)
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Verified,
    Failed,
    Pending,
}

/// Pass/Fail/Unverified summary of the hardware attestation as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationSummary {
    Pass,
    Fail,
    #[default]
    Unverified,
}

impl AttestationSummary {
    /// Summarize the hardware verifier outcomes for a fetched report.
    pub fn evaluate(
        report_present: bool,
        gpu: Option<&HardwareVerificationResult>,
        cpu: Option<&HardwareVerificationResult>,
        intel_required: bool,
    ) -> Self {
        if !report_present {
            return Self::Unverified;
        }
        let gpu_failed = gpu.is_some_and(|g| !g.verified);
        let cpu_failed = intel_required && cpu.is_some_and(|c| !c.verified);
        if gpu_failed || cpu_failed {
            return Self::Fail;
        }
        let gpu_ok = gpu.is_some_and(|g| g.verified);
        let cpu_ok = !intel_required || cpu.is_some_and(|c| c.verified);
        if gpu_ok && cpu_ok {
            Self::Pass
        } else {
            Self::Unverified
        }
    }
}

/// Everything [`derive`] looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeriveInput<'a> {
    pub report: Option<&'a NormalizedReport>,
    pub signature: Option<&'a SignaturePayload>,
    pub request_hash: Option<&'a str>,
    pub response_hash: Option<&'a str>,
    pub gpu: Option<&'a HardwareVerificationResult>,
    pub cpu: Option<&'a HardwareVerificationResult>,
    pub nonce: Option<&'a NonceCheck>,
    pub summary: AttestationSummary,
    /// A CPU quote is present and CPU verification is configured.
    pub intel_required: bool,
    pub intel_configured: bool,
    /// GPU evidence was present but the verifier could not run for lack of
    /// reference values.
    pub gpu_expectations_missing: bool,
}

/// The engine's verdict. Produced once by [`derive`] and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationState {
    steps: BTreeMap<StepKind, VerificationStep>,
    overall: OverallStatus,
    reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered_address: Option<String>,
}

impl VerificationState {
    pub fn steps(&self) -> &BTreeMap<StepKind, VerificationStep> {
        &self.steps
    }

    pub fn step(&self, kind: StepKind) -> &VerificationStep {
        // derive() always fills every kind
        &self.steps[&kind]
    }

    pub fn overall(&self) -> OverallStatus {
        self.overall
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn recovered_address(&self) -> Option<&str> {
        self.recovered_address.as_deref()
    }
}

pub fn derive(input: &DeriveInput<'_>) -> VerificationState {
    let mut reasons = Vec::new();
    let mut steps = BTreeMap::new();

    steps.insert(StepKind::Hash, hash_step(input, &mut reasons));
    let (signature, recovered) = signature_step(input, &mut reasons);
    steps.insert(StepKind::Signature, signature);
    steps.insert(
        StepKind::Address,
        address_step(input.report, recovered.as_deref(), &mut reasons),
    );
    steps.insert(StepKind::Attestation, attestation_step(input.summary, &mut reasons));
    steps.insert(StepKind::Nonce, nonce_step(input.nonce, &mut reasons));
    steps.insert(StepKind::Gpu, gpu_step(input, &mut reasons));
    steps.insert(StepKind::Cpu, cpu_step(input, &mut reasons));

    let overall = if steps.values().any(|s| s.status == StepStatus::Error) {
        OverallStatus::Failed
    } else if steps
        .iter()
        .any(|(kind, s)| s.status == StepStatus::Pending && is_required(*kind, input))
    {
        OverallStatus::Pending
    } else {
        OverallStatus::Verified
    };
    debug_assert!(overall != OverallStatus::Failed || !reasons.is_empty());

    VerificationState {
        steps,
        overall,
        reasons,
        recovered_address: recovered,
    }
}

fn is_required(kind: StepKind, input: &DeriveInput<'_>) -> bool {
    kind != StepKind::Cpu || input.intel_required
}

fn hash_step(input: &DeriveInput<'_>, reasons: &mut Vec<String>) -> VerificationStep {
    let (Some(req), Some(res)) = (
        non_empty(input.request_hash),
        non_empty(input.response_hash),
    ) else {
        return VerificationStep::pending("Waiting for request and response hashes");
    };
    let Some(sig) = input.signature else {
        return VerificationStep::success("Request and response hashes recorded");
    };
    if text_contains_hash(&sig.text, req) && text_contains_hash(&sig.text, res) {
        VerificationStep::success("Hashes match signed text")
    } else {
        reasons.push("Hash mismatch".into());
        VerificationStep::error("Hash mismatch")
            .with_details(format!("expected {req}:{res}, signed text {}", sig.text))
    }
}

fn signature_step(
    input: &DeriveInput<'_>,
    reasons: &mut Vec<String>,
) -> (VerificationStep, Option<String>) {
    let Some(sig) = input.signature else {
        return (VerificationStep::pending("Waiting for signature"), None);
    };
    match SignatureVerifier::new().recover(sig) {
        Ok(recovered) => {
            let declared = sig.signing_address.trim();
            if !declared.is_empty() && normalize_address(declared) != normalize_address(&recovered)
            {
                reasons.push("Signature invalid".into());
                let step = VerificationStep::error("Signature does not match declared signer")
                    .with_details(format!("declared {declared}, recovered {recovered}"));
                (step, Some(recovered))
            } else {
                let step = VerificationStep::success("Signature valid")
                    .with_details(format!("signed by {recovered}"));
                (step, Some(recovered))
            }
        }
        Err(e) => {
            reasons.push("Signature invalid".into());
            (
                VerificationStep::error("Signature invalid").with_details(e.to_string()),
                None,
            )
        }
    }
}

fn address_step(
    report: Option<&NormalizedReport>,
    recovered: Option<&str>,
    reasons: &mut Vec<String>,
) -> VerificationStep {
    let Some(recovered) = recovered else {
        return VerificationStep::pending("Waiting for recovered signing address");
    };
    let Some(report) = report else {
        return VerificationStep::pending("Waiting for attestation report");
    };
    if report.recognizes_signer(recovered) {
        VerificationStep::success("Signing address attested")
    } else {
        reasons.push("Signing address not recognized".into());
        VerificationStep::error("Signing address not recognized").with_details(format!(
            "{recovered} not in [{}]",
            report.signer_candidates.join(", ")
        ))
    }
}

fn attestation_step(summary: AttestationSummary, reasons: &mut Vec<String>) -> VerificationStep {
    match summary {
        AttestationSummary::Pass => VerificationStep::success("Attestation passed"),
        AttestationSummary::Fail => {
            reasons.push("Attestation failed".into());
            VerificationStep::error("Attestation failed")
        }
        AttestationSummary::Unverified => VerificationStep::pending("Attestation not yet verified"),
    }
}

fn nonce_step(check: Option<&NonceCheck>, reasons: &mut Vec<String>) -> VerificationStep {
    let Some(check) = check else {
        return VerificationStep::pending("No nonce check performed");
    };
    if check.valid {
        return VerificationStep::success("Nonce bound to attestation");
    }
    let reason = match (&check.expected, &check.attested) {
        (None, _) => "No expected nonce to bind against",
        (_, None) => "Nonce missing from attestation",
        (Some(e), Some(a)) if !a.trim().eq_ignore_ascii_case(e.trim()) => "Nonce mismatch",
        _ => "NRAS nonce mismatch",
    };
    reasons.push(reason.into());
    VerificationStep::error(reason).with_details(format!(
        "expected {}, attested {}, nras {}",
        check.expected.as_deref().unwrap_or("-"),
        check.attested.as_deref().unwrap_or("-"),
        check.nras.as_deref().unwrap_or("-"),
    ))
}

fn gpu_step(input: &DeriveInput<'_>, reasons: &mut Vec<String>) -> VerificationStep {
    match input.gpu {
        Some(gpu) if gpu.verified => VerificationStep::success("GPU attestation verified"),
        Some(gpu) => {
            reasons.push("GPU attestation failed".into());
            reasons.extend(gpu.reasons.iter().cloned());
            VerificationStep::error("GPU attestation failed").with_details(gpu.reasons.join("; "))
        }
        None if input.gpu_expectations_missing => {
            reasons.push("GPU hardware expectations missing".into());
            VerificationStep::pending("GPU hardware expectations missing")
        }
        None if input.report.is_some_and(|r| !r.has_gpu_evidence()) => {
            VerificationStep::pending("No GPU evidence in attestation")
        }
        None => VerificationStep::pending("GPU attestation not yet verified"),
    }
}

fn cpu_step(input: &DeriveInput<'_>, reasons: &mut Vec<String>) -> VerificationStep {
    let has_quote = input.report.is_some_and(|r| r.has_intel_quote());
    match input.cpu {
        Some(cpu) if cpu.verified => VerificationStep::success("CPU attestation verified"),
        Some(cpu) if input.intel_required => {
            reasons.push("CPU attestation failed".into());
            reasons.extend(cpu.reasons.iter().cloned());
            VerificationStep::error("CPU attestation failed").with_details(cpu.reasons.join("; "))
        }
        None if input.intel_required => {
            reasons.push("CPU attestation did not complete".into());
            VerificationStep::error("CPU attestation did not complete")
        }
        _ if has_quote && !input.intel_configured => {
            VerificationStep::pending("CPU verification not configured")
        }
        _ if !has_quote => VerificationStep::pending("No CPU evidence in attestation"),
        _ => VerificationStep::pending("CPU attestation not required"),
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use serde_json::json;
    use tessera_core::report::AttestationReport;
    use tessera_verify::signature::{address_of, eip191_hash};

    const REQ: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const RES: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn signed(text: &str, key_byte: u8) -> SignaturePayload {
        let key = SigningKey::from_slice(&[key_byte; 32]).unwrap();
        let (sig, recid) = key
            .sign_prehash_recoverable(&eip191_hash(text.as_bytes()))
            .unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        SignaturePayload {
            text: text.into(),
            signature: hex::encode(bytes),
            signing_address: address_of(key.verifying_key()),
            signing_algo: "ecdsa".into(),
        }
    }

    fn report_for(address: &str, intel: bool) -> NormalizedReport {
        let mut doc = json!({
            "signing_address": address,
            "nvidia_payload": {"nonce": "n1", "arch": "HOPPER", "evidence_list": []},
        });
        if intel {
            doc["intel_quote"] = json!("00");
        }
        AttestationReport(doc).normalize()
    }

    struct Fixture {
        report: NormalizedReport,
        sig: SignaturePayload,
        gpu: HardwareVerificationResult,
        nonce: NonceCheck,
    }

    fn fixture() -> Fixture {
        let sig = signed(&format!("{REQ}:{RES}"), 3);
        Fixture {
            report: report_for(&sig.signing_address, false),
            sig,
            gpu: HardwareVerificationResult::passed(None, None),
            nonce: NonceCheck {
                expected: Some("n1".into()),
                attested: Some("n1".into()),
                nras: None,
                valid: true,
            },
        }
    }

    fn input(f: &Fixture) -> DeriveInput<'_> {
        DeriveInput {
            report: Some(&f.report),
            signature: Some(&f.sig),
            request_hash: Some(REQ),
            response_hash: Some(RES),
            gpu: Some(&f.gpu),
            cpu: None,
            nonce: Some(&f.nonce),
            summary: AttestationSummary::evaluate(true, Some(&f.gpu), None, false),
            intel_required: false,
            intel_configured: false,
            gpu_expectations_missing: false,
        }
    }

    #[test]
    fn fully_valid_proof_is_verified() {
        let f = fixture();
        let state = derive(&input(&f));
        assert_eq!(state.overall(), OverallStatus::Verified);
        assert!(state.reasons().is_empty());
        assert_eq!(state.recovered_address(), Some(f.sig.signing_address.as_str()));
        for kind in StepKind::ALL {
            let expected = if kind == StepKind::Cpu {
                StepStatus::Pending
            } else {
                StepStatus::Success
            };
            assert_eq!(state.step(kind).status, expected, "{kind:?}");
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let f = fixture();
        assert_eq!(derive(&input(&f)), derive(&input(&f)));
    }

    #[test]
    fn gpu_failure_fails_overall() {
        let mut f = fixture();
        f.gpu = HardwareVerificationResult::failed("UEID mismatch");
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Gpu).status, StepStatus::Error);
        assert_eq!(state.step(StepKind::Attestation).status, StepStatus::Error);
        assert_eq!(state.overall(), OverallStatus::Failed);
        assert!(state.reasons().iter().any(|r| r == "GPU attestation failed"));
        assert!(state.reasons().iter().any(|r| r == "UEID mismatch"));
    }

    #[test]
    fn missing_signature_is_pending_without_reasons() {
        let f = fixture();
        let mut i = input(&f);
        i.signature = None;
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Signature).status, StepStatus::Pending);
        assert_eq!(state.step(StepKind::Address).status, StepStatus::Pending);
        assert_eq!(state.overall(), OverallStatus::Pending);
        assert!(state.reasons().is_empty());
    }

    #[test]
    fn hash_contradiction_is_error() {
        let f = fixture();
        let mut i = input(&f);
        i.response_hash = Some("ffff");
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Hash).status, StepStatus::Error);
        assert_eq!(state.overall(), OverallStatus::Failed);
        assert_eq!(state.reasons(), ["Hash mismatch"]);
    }

    #[test]
    fn unknown_hashes_are_pending() {
        let f = fixture();
        let mut i = input(&f);
        i.request_hash = None;
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Hash).status, StepStatus::Pending);
        assert_eq!(state.overall(), OverallStatus::Pending);
    }

    #[test]
    fn foreign_signer_is_not_recognized() {
        let mut f = fixture();
        f.report = report_for("0x0000000000000000000000000000000000000001", false);
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Signature).status, StepStatus::Success);
        assert_eq!(state.step(StepKind::Address).status, StepStatus::Error);
        assert_eq!(state.reasons(), ["Signing address not recognized"]);
    }

    #[test]
    fn declared_signer_mismatch_is_invalid_signature() {
        let mut f = fixture();
        f.sig.signing_address = "0x0000000000000000000000000000000000000001".into();
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Signature).status, StepStatus::Error);
        assert!(state.reasons().contains(&"Signature invalid".to_string()));
        assert_eq!(state.overall(), OverallStatus::Failed);
    }

    #[test]
    fn garbage_signature_is_error() {
        let mut f = fixture();
        f.sig.signature = "0xdeadbeef".into();
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Signature).status, StepStatus::Error);
        assert_eq!(state.step(StepKind::Address).status, StepStatus::Pending);
        assert_eq!(state.recovered_address(), None);
    }

    #[test]
    fn nonce_mismatch_fails() {
        let mut f = fixture();
        f.nonce.attested = Some("other".into());
        f.nonce.valid = false;
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Nonce).status, StepStatus::Error);
        assert_eq!(state.reasons(), ["Nonce mismatch"]);
    }

    #[test]
    fn no_nonce_check_is_pending() {
        let f = fixture();
        let mut i = input(&f);
        i.nonce = None;
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Nonce).status, StepStatus::Pending);
        assert_eq!(state.overall(), OverallStatus::Pending);
    }

    #[test]
    fn cpu_not_applicable_never_blocks() {
        let f = fixture();
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Cpu).status, StepStatus::Pending);
        assert_eq!(state.overall(), OverallStatus::Verified);
    }

    #[test]
    fn unconfigured_cpu_is_reported_not_failed() {
        let mut f = fixture();
        f.report = report_for(&f.sig.signing_address, true);
        let state = derive(&input(&f));
        assert_eq!(state.step(StepKind::Cpu).message, "CPU verification not configured");
        assert_eq!(state.overall(), OverallStatus::Verified);
    }

    #[test]
    fn required_cpu_failure() {
        let mut f = fixture();
        f.report = report_for(&f.sig.signing_address, true);
        let cpu = HardwareVerificationResult::failed("Intel nonce mismatch");
        let mut i = input(&f);
        i.cpu = Some(&cpu);
        i.intel_required = true;
        i.intel_configured = true;
        i.summary = AttestationSummary::evaluate(true, Some(&f.gpu), Some(&cpu), true);
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Cpu).status, StepStatus::Error);
        assert_eq!(state.overall(), OverallStatus::Failed);
        assert!(state.reasons().contains(&"Intel nonce mismatch".to_string()));
    }

    #[test]
    fn required_cpu_without_result_is_error() {
        let mut f = fixture();
        f.report = report_for(&f.sig.signing_address, true);
        let mut i = input(&f);
        i.intel_required = true;
        i.intel_configured = true;
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Cpu).status, StepStatus::Error);
        assert_eq!(state.overall(), OverallStatus::Failed);
    }

    #[test]
    fn expectations_missing_keeps_gpu_pending_with_reason() {
        let f = fixture();
        let mut i = input(&f);
        i.gpu = None;
        i.gpu_expectations_missing = true;
        i.summary = AttestationSummary::evaluate(true, None, None, false);
        let state = derive(&i);
        assert_eq!(state.step(StepKind::Gpu).status, StepStatus::Pending);
        assert_eq!(state.overall(), OverallStatus::Pending);
        assert_eq!(state.reasons(), ["GPU hardware expectations missing"]);
    }

    #[test]
    fn any_error_means_never_verified() {
        let f = fixture();
        let bad_gpu = HardwareVerificationResult::failed("x");
        let bad_nonce = NonceCheck::default();
        for case in 0..4 {
            let mut i = input(&f);
            match case {
                0 => i.response_hash = Some("00"),
                1 => i.gpu = Some(&bad_gpu),
                2 => i.nonce = Some(&bad_nonce),
                _ => i.summary = AttestationSummary::Fail,
            }
            let state = derive(&i);
            assert_eq!(state.overall(), OverallStatus::Failed, "case {case}");
            assert!(!state.reasons().is_empty());
        }
    }

    #[test]
    fn summary_evaluation() {
        let pass = HardwareVerificationResult::passed(None, None);
        let fail = HardwareVerificationResult::failed("x");
        use AttestationSummary::*;
        assert_eq!(AttestationSummary::evaluate(false, Some(&pass), None, false), Unverified);
        assert_eq!(AttestationSummary::evaluate(true, Some(&pass), None, false), Pass);
        assert_eq!(AttestationSummary::evaluate(true, Some(&fail), None, false), Fail);
        assert_eq!(AttestationSummary::evaluate(true, None, None, false), Unverified);
        assert_eq!(AttestationSummary::evaluate(true, Some(&pass), None, true), Unverified);
        assert_eq!(AttestationSummary::evaluate(true, Some(&pass), Some(&fail), true), Fail);
        assert_eq!(AttestationSummary::evaluate(true, Some(&pass), Some(&pass), true), Pass);
    }

    #[test]
    fn serializes_lowercase_steps() {
        let f = fixture();
        let json = serde_json::to_value(derive(&input(&f))).unwrap();
        assert_eq!(json["overall"], "verified");
        assert_eq!(json["steps"]["gpu"]["status"], "success");
        assert!(json["recoveredAddress"].is_string());
    }
}
