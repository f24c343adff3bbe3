//! Attestation report as served by the inference provider, and the single
//! normalization step that maps its several known shapes into one struct.
//!
//! The same facts can live in three places: the top-level document, a nested
//! `gateway_attestation` object, or the first entry of a model-attestation
//! list (`model_attestations`, older deployments use `all_attestations`).
//! Every "try A, then B, then C" search lives here and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key names under which an NVIDIA payload may carry its nonce.
pub const GPU_NONCE_KEYS: [&str; 3] = ["nonce", "eat_nonce", "request_nonce"];

const GATEWAY_KEY: &str = "gateway_attestation";
const MODEL_LIST_KEYS: [&str; 2] = ["model_attestations", "all_attestations"];

/// Raw report document. Kept verbatim so callers can render a full audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttestationReport(pub Value);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadSource {
    TopLevel,
    Gateway,
    ModelList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuEvidence {
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// NVIDIA evidence block, ready to be forwarded to NRAS.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuPayload {
    pub source: PayloadSource,
    pub arch: Option<String>,
    pub evidence_list: Vec<GpuEvidence>,
    /// The payload object as found in the report.
    pub raw: Value,
}

impl GpuPayload {
    /// First non-empty nonce under any of the synonym keys.
    pub fn nonce(&self) -> Option<String> {
        GPU_NONCE_KEYS
            .iter()
            .find_map(|key| non_empty_str(self.raw.get(*key)))
    }
}

/// Intel TDX quote plus the nonce the provider says it bound into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntelEvidence {
    pub quote: String,
    pub request_nonce: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedReport {
    /// Candidate GPU payloads in search order.
    pub gpu_payloads: Vec<GpuPayload>,
    pub intel: Option<IntelEvidence>,
    /// Addresses the report declares as legitimate transcript signers.
    pub signer_candidates: Vec<String>,
    pub request_nonce: Option<String>,
}

impl NormalizedReport {
    pub fn first_gpu_payload(&self) -> Option<&GpuPayload> {
        self.gpu_payloads.first()
    }

    pub fn has_gpu_evidence(&self) -> bool {
        !self.gpu_payloads.is_empty()
    }

    pub fn has_intel_quote(&self) -> bool {
        self.intel.is_some()
    }

    /// Case-insensitive membership test against the signer candidates.
    pub fn recognizes_signer(&self, address: &str) -> bool {
        let needle = normalize_address(address);
        self.signer_candidates
            .iter()
            .any(|c| normalize_address(c) == needle)
    }
}

impl AttestationReport {
    pub fn normalize(&self) -> NormalizedReport {
        let top = &self.0;
        let gateway = top.get(GATEWAY_KEY).filter(|v| v.is_object());
        let model_list: Vec<&Value> = MODEL_LIST_KEYS
            .iter()
            .find_map(|k| top.get(*k).and_then(Value::as_array))
            .map(|list| list.iter().filter(|v| v.is_object()).collect())
            .unwrap_or_default();

        let mut locations: Vec<(PayloadSource, &Value)> = vec![(PayloadSource::TopLevel, top)];
        if let Some(g) = gateway {
            locations.push((PayloadSource::Gateway, g));
        }
        if let Some(first) = model_list.first() {
            locations.push((PayloadSource::ModelList, first));
        }

        let gpu_payloads = locations
            .iter()
            .filter_map(|(source, doc)| parse_gpu_payload(*source, doc))
            .collect();

        let intel = locations.iter().find_map(|(_, doc)| {
            let quote = non_empty_str(doc.get("intel_quote"))?;
            Some(IntelEvidence {
                quote,
                request_nonce: non_empty_str(doc.get("request_nonce")),
            })
        });

        let mut signer_candidates = Vec::new();
        let mut push = |v: Option<&Value>| {
            if let Some(addr) = non_empty_str(v) {
                if !signer_candidates.contains(&addr) {
                    signer_candidates.push(addr);
                }
            }
        };
        push(top.get("signing_address"));
        if let Some(g) = gateway {
            push(g.get("signing_address"));
            if let Some(raw) = g.get("raw") {
                let raw = embedded_json(raw);
                push(raw.as_ref().and_then(|r| r.get("signing_address")));
            }
        }
        for entry in &model_list {
            push(entry.get("signing_address"));
        }

        NormalizedReport {
            gpu_payloads,
            intel,
            signer_candidates,
            request_nonce: non_empty_str(top.get("request_nonce")),
        }
    }
}

fn parse_gpu_payload(source: PayloadSource, doc: &Value) -> Option<GpuPayload> {
    let raw = embedded_json(doc.get("nvidia_payload")?)?;
    if !raw.is_object() {
        return None;
    }
    let evidence_list: Vec<GpuEvidence> = raw
        .get("evidence_list")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    Some(GpuPayload {
        source,
        arch: non_empty_str(raw.get("arch")),
        evidence_list,
        raw,
    })
}

/// Providers sometimes embed JSON documents as strings. Accept both forms.
fn embedded_json(v: &Value) -> Option<Value> {
    match v {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lowercase hex without the `0x` prefix.
pub fn normalize_address(addr: &str) -> String {
    let trimmed = addr.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}
