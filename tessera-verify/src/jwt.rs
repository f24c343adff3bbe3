//! NRAS token claims.
//!
//! No signature check happens here. The token is trusted because it came back
//! over TLS from the NRAS call itself; local decode is a convenience for
//! reading claims and for sanity checks on issuer and validity window.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

pub const NRAS_ISSUER: &str = "https://nras.attestation.nvidia.com";
pub const OVERALL_RESULT_CLAIM: &str = "x-nvidia-overall-att-result";
pub const NONCE_CLAIM: &str = "eat_nonce";

/// Decode the claims segment of a JWT. `None` on any structural problem.
pub fn decode(token: &str) -> Option<Value> {
    let payload = token.trim().split('.').nth(1)?;
    decode_segment(payload)
}

/// Decode the header segment of a JWT.
pub fn decode_header(token: &str) -> Option<Value> {
    let header = token.trim().split('.').next()?;
    decode_segment(header)
}

fn decode_segment(segment: &str) -> Option<Value> {
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.is_object().then_some(value)
}

/// Checks issuer, validity window and the overall-result claim.
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    issuer: String,
}

impl ClaimsValidator {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    pub fn nras() -> Self {
        Self::new(NRAS_ISSUER)
    }

    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, unix_now())
    }

    /// Same as [`verify`](Self::verify) against a fixed clock.
    pub fn verify_at(&self, token: &str, now: i64) -> bool {
        if token.trim().split('.').count() != 3 {
            return false;
        }
        let Some(claims) = decode(token) else {
            return false;
        };
        self.claims_valid_at(&claims, now)
    }

    pub fn claims_valid_at(&self, claims: &Value, now: i64) -> bool {
        if claims.get("iss").and_then(Value::as_str) != Some(self.issuer.as_str()) {
            return false;
        }
        match claims.get("exp") {
            None => {}
            Some(exp) => match numeric(exp) {
                Some(exp) if exp > now => {}
                _ => return false,
            },
        }
        match claims.get("nbf") {
            None => {}
            Some(nbf) => match numeric(nbf) {
                Some(nbf) if nbf <= now => {}
                _ => return false,
            },
        }
        claims.get(OVERALL_RESULT_CLAIM) == Some(&Value::Bool(true))
    }
}

impl Default for ClaimsValidator {
    fn default() -> Self {
        Self::nras()
    }
}

/// Shorthand for validating against the NRAS issuer and the system clock.
pub fn verify(token: &str) -> bool {
    ClaimsValidator::nras().verify(token)
}

fn numeric(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Build an unsigned token from claims. Only meaningful for fixtures.
pub fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES384","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.c2ln")
}
