//! One verification run: session bootstrap, artifact fetch, hardware
//! verification, nonce binding and the final verdict.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tessera_attest::nonce::{self, NonceSource};
use tessera_attest::{
    AttestationSummary, DeriveInput, NonceResyncPolicy, SessionStore, VerificationSession,
    VerificationState, derive,
};
use tessera_core::error::{Result, TesseraError};
use tessera_core::hashes::{self, TranscriptHashes};
use tessera_core::proof::{GpuExpectations, HardwareVerificationResult, NonceCheck, SignaturePayload};
use tessera_core::report::{AttestationReport, NormalizedReport};
use tessera_fetch::{
    Config, CpuVerifier, ExpectationStore, FetchError, Fetchers, GpuVerifier, ProofSource,
    RetryPolicy, fetch_artifacts,
};

/// Caller-supplied inputs for one verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyParams {
    pub verification_id: String,
    /// Remote transcript id; defaults to the verification id.
    pub message_id: Option<String>,
    pub model: Option<String>,
    /// Only used when the session does not have a nonce yet.
    pub nonce: Option<String>,
    pub request_hash: Option<String>,
    pub response_hash: Option<String>,
    pub expectations: GpuExpectations,
}

/// The verdict plus every artifact it was derived from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub verification_id: String,
    #[serde(flatten)]
    pub state: VerificationState,
    pub attestation: Option<AttestationReport>,
    pub signature: Option<SignaturePayload>,
    pub gpu: Option<HardwareVerificationResult>,
    pub cpu: Option<HardwareVerificationResult>,
    pub nonce_check: Option<NonceCheck>,
    pub hashes: ResolvedHashes,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedHashes {
    pub request_hash: Option<String>,
    pub response_hash: Option<String>,
}

pub struct VerificationEngine {
    sessions: Arc<SessionStore>,
    source: Arc<dyn ProofSource>,
    gpu: Arc<dyn GpuVerifier>,
    cpu: Option<Arc<dyn CpuVerifier>>,
    expectations: Option<ExpectationStore>,
    retry: RetryPolicy,
    settle_delay: Duration,
    default_model: String,
    resync: NonceResyncPolicy,
    config_missing: BTreeMap<String, String>,
}

impl VerificationEngine {
    pub fn new(fetchers: Fetchers, config: &Config) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            source: fetchers.source,
            gpu: fetchers.gpu,
            cpu: fetchers.cpu,
            expectations: fetchers.expectations,
            retry: config.retry.clone(),
            settle_delay: config.settle_delay,
            default_model: config.default_model.clone(),
            resync: NonceResyncPolicy::default(),
            config_missing: config.missing(),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_resync_policy(mut self, policy: NonceResyncPolicy) -> Self {
        self.resync = policy;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn intel_configured(&self) -> bool {
        self.cpu.is_some()
    }

    pub async fn verify(&self, params: VerifyParams) -> Result<VerifyOutcome> {
        let id = params.verification_id.trim().to_string();
        if id.is_empty() {
            return Err(TesseraError::InvalidInput("verificationId is required".into()));
        }
        if !self.config_missing.is_empty() {
            return Err(TesseraError::ConfigMissing(self.config_missing.clone()));
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let session = self.sessions.register(
            &id,
            params.nonce.as_deref(),
            params.request_hash.as_deref(),
            params.response_hash.as_deref(),
        )?;
        let model = params
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        let message_id = params
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&id);

        let mut run = Run {
            id: &id,
            notes: Vec::new(),
        };

        let artifacts = fetch_artifacts(
            self.source.as_ref(),
            &self.retry,
            message_id,
            model,
            session.nonce.as_deref(),
        )
        .await;
        if let Some(timeout) = artifacts.timeout() {
            return Err(timeout.clone().into());
        }
        if artifacts.nothing_available() {
            return Err(TesseraError::Unavailable(format!(
                "proof for {message_id} is not available yet"
            )));
        }
        let report = artifacts
            .report
            .map_err(|e| run.note(format!("Attestation report unavailable: {e}")))
            .ok();
        let signature = artifacts
            .signature
            .map_err(|e| run.note(format!("Signature unavailable: {e}")))
            .ok();
        let normalized = report.as_ref().map(AttestationReport::normalize);

        let hashes = self.resolve_hashes(&mut run, &session, signature.as_ref())?;

        let mut expectations = params.expectations.clone();
        if let Some(known) = self.expectations.as_ref().and_then(|s| s.lookup(model)) {
            expectations.fill_missing(known);
        }
        let (gpu, gpu_expectations_missing) = self
            .verify_gpu(&mut run, normalized.as_ref(), &expectations, session.nonce.as_deref())
            .await?;

        let intel_present = normalized
            .as_ref()
            .is_some_and(NormalizedReport::has_intel_quote);
        let intel_configured = self.cpu.is_some();
        let intel_required = intel_present && intel_configured;

        // GPU evidence may re-sync the session before the quote is checked
        // against it; Intel evidence can only re-sync after its own check.
        let mut expected = session.nonce.clone();
        self.resync_nonce(
            &mut run,
            &mut expected,
            normalized.as_ref(),
            gpu.as_ref(),
            None,
            &hashes,
        )?;
        let cpu = self
            .verify_cpu(&mut run, normalized.as_ref(), expected.as_deref())
            .await?;
        self.resync_nonce(
            &mut run,
            &mut expected,
            normalized.as_ref(),
            gpu.as_ref(),
            cpu.as_ref(),
            &hashes,
        )?;
        let nonce_check = bind_nonce(expected.as_deref(), normalized.as_ref(), gpu.as_ref());

        let summary = AttestationSummary::evaluate(
            normalized.is_some(),
            gpu.as_ref(),
            cpu.as_ref(),
            intel_required,
        );
        let state = derive(&DeriveInput {
            report: normalized.as_ref(),
            signature: signature.as_ref(),
            request_hash: hashes.request_hash.as_deref(),
            response_hash: hashes.response_hash.as_deref(),
            gpu: gpu.as_ref(),
            cpu: cpu.as_ref(),
            nonce: nonce_check.as_ref(),
            summary,
            intel_required,
            intel_configured,
            gpu_expectations_missing,
        });

        tracing::info!(
            verification_id = %id,
            overall = ?state.overall(),
            reasons = state.reasons().len(),
            "verification derived"
        );

        Ok(VerifyOutcome {
            verification_id: id.clone(),
            state,
            attestation: report,
            signature,
            gpu,
            cpu,
            nonce_check,
            hashes,
            notes: run.notes,
        })
    }

    /// Signed-text hashes win over session hashes when both halves parse.
    fn resolve_hashes(
        &self,
        run: &mut Run<'_>,
        session: &VerificationSession,
        signature: Option<&SignaturePayload>,
    ) -> Result<ResolvedHashes> {
        let from_session = ResolvedHashes {
            request_hash: session.request_hash.clone(),
            response_hash: session.response_hash.clone(),
        };
        let Some(TranscriptHashes {
            request_hash,
            response_hash,
        }) = signature.and_then(|s| hashes::extract(&s.text))
        else {
            return Ok(from_session);
        };

        let signed = ResolvedHashes {
            request_hash: Some(request_hash),
            response_hash: Some(response_hash),
        };
        let had_any = from_session.request_hash.is_some() || from_session.response_hash.is_some();
        if had_any && !same_hashes(&from_session, &signed) {
            run.note("Using hashes from the signed transcript instead of session hashes");
        }
        self.sessions.update_hashes(
            run.id,
            signed.request_hash.as_deref(),
            signed.response_hash.as_deref(),
        )?;
        Ok(signed)
    }

    /// Returns the GPU result and whether evidence went unchecked for lack
    /// of reference values.
    async fn verify_gpu(
        &self,
        run: &mut Run<'_>,
        report: Option<&NormalizedReport>,
        expectations: &GpuExpectations,
        nonce: Option<&str>,
    ) -> Result<(Option<HardwareVerificationResult>, bool)> {
        let Some(payload) = report.and_then(NormalizedReport::first_gpu_payload) else {
            return Ok((None, false));
        };
        if !expectations.is_complete() {
            run.note(format!(
                "GPU verification skipped, missing {}",
                expectations.missing_fields().join(", ")
            ));
            return Ok((None, true));
        }
        match self.gpu.verify(payload, expectations, nonce).await {
            Ok(result) => Ok((Some(result), false)),
            Err(e) => Ok((None, self.absorb(run, "GPU verifier", e)?)),
        }
    }

    async fn verify_cpu(
        &self,
        run: &mut Run<'_>,
        report: Option<&NormalizedReport>,
        nonce: Option<&str>,
    ) -> Result<Option<HardwareVerificationResult>> {
        let Some(evidence) = report.and_then(|r| r.intel.as_ref()) else {
            return Ok(None);
        };
        let Some(cpu) = self.cpu.as_ref() else {
            run.note("CPU verification not configured");
            return Ok(None);
        };
        match cpu.verify(evidence, nonce).await {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                self.absorb(run, "CPU verifier", e)?;
                Ok(None)
            }
        }
    }

    /// Timeouts abort the run; anything else becomes a note and the verifier
    /// counts as not having run.
    fn absorb(&self, run: &mut Run<'_>, what: &str, e: FetchError) -> Result<bool> {
        if e.is_timeout() {
            return Err(e.into());
        }
        run.note(format!("{what} unavailable: {e}"));
        Ok(false)
    }

    /// Replace `expected` (and the stored session nonce) with the attested
    /// nonce when the policy allows it.
    fn resync_nonce(
        &self,
        run: &mut Run<'_>,
        expected: &mut Option<String>,
        report: Option<&NormalizedReport>,
        gpu: Option<&HardwareVerificationResult>,
        cpu: Option<&HardwareVerificationResult>,
        hashes: &ResolvedHashes,
    ) -> Result<()> {
        let attested = nonce::extract_nonce(report, gpu);
        let nras = nonce::nras_nonce(gpu);
        let Some(attested) = attested else {
            return Ok(());
        };
        let evidence_verified = match attested.source {
            NonceSource::NrasClaims | NonceSource::GpuPayload => gpu.is_some_and(|g| g.verified),
            NonceSource::IntelQuote => cpu.is_some_and(|c| c.verified),
        };
        let Some(target) = self.resync.resync_target(
            expected.as_deref(),
            Some(&attested),
            nras.as_deref(),
            evidence_verified,
        ) else {
            return Ok(());
        };
        self.sessions.sync_nonce(
            run.id,
            &target,
            hashes.request_hash.as_deref(),
            hashes.response_hash.as_deref(),
        )?;
        run.note(format!(
            "Session nonce re-synced to attested value from {}",
            attested.source
        ));
        *expected = Some(target);
        Ok(())
    }
}

/// No report yet means no check, so the nonce step stays pending.
fn bind_nonce(
    expected: Option<&str>,
    report: Option<&NormalizedReport>,
    gpu: Option<&HardwareVerificationResult>,
) -> Option<NonceCheck> {
    report?;
    let attested = nonce::extract_nonce(report, gpu);
    if expected.is_none() && attested.is_none() {
        return None;
    }
    Some(nonce::bind(
        expected,
        attested.as_ref().map(|a| a.value.as_str()),
        nonce::nras_nonce(gpu).as_deref(),
    ))
}

/// Per-run scratch state.
struct Run<'a> {
    id: &'a str,
    notes: Vec<String>,
}

impl Run<'_> {
    fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        tracing::info!(verification_id = self.id, "{note}");
        self.notes.push(note);
    }
}

fn same_hashes(a: &ResolvedHashes, b: &ResolvedHashes) -> bool {
    let eq = |x: &Option<String>, y: &Option<String>| match (x, y) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        (None, None) => true,
        _ => false,
    };
    eq(&a.request_hash, &b.request_hash) && eq(&a.response_hash, &b.response_hash)
}
