use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_core::error::{Result, TesseraError};

/// Server-side record of the nonce and hashes expected for one verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    pub verification_id: String,
    pub nonce: Option<String>,
    pub request_hash: Option<String>,
    pub response_hash: Option<String>,
}

impl VerificationSession {
    fn new(id: &str) -> Self {
        Self {
            verification_id: id.to_string(),
            ..Default::default()
        }
    }

    /// Overwrite hash fields only with incoming non-empty values.
    fn merge_hashes(&mut self, request_hash: Option<&str>, response_hash: Option<&str>) {
        if let Some(h) = present(request_hash) {
            self.request_hash = Some(h);
        }
        if let Some(h) = present(response_hash) {
            self.response_hash = Some(h);
        }
    }
}

/// In-memory, process-lifetime store of verification sessions.
///
/// Nothing is persisted and nothing expires: sessions live until the process
/// exits or [`clear`](Self::clear) is called. Concurrent writers for the same
/// id race with last-writer-wins on hashes, except that a value is never
/// replaced by an absent one.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, VerificationSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session if absent, otherwise merge newly supplied values.
    ///
    /// A nonce already on record is authoritative and is not replaced here;
    /// use [`sync_nonce`](Self::sync_nonce) for that.
    pub fn register(
        &self,
        id: &str,
        nonce: Option<&str>,
        request_hash: Option<&str>,
        response_hash: Option<&str>,
    ) -> Result<VerificationSession> {
        let id = validate_id(id)?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| VerificationSession::new(id));
        if session.nonce.is_none() {
            session.nonce = present(nonce);
        }
        session.merge_hashes(request_hash, response_hash);
        Ok(session.clone())
    }

    pub fn get(&self, id: &str) -> Option<VerificationSession> {
        self.sessions.read().get(id.trim()).cloned()
    }

    /// Partial hash merge. No-op when the session does not exist.
    pub fn update_hashes(
        &self,
        id: &str,
        request_hash: Option<&str>,
        response_hash: Option<&str>,
    ) -> Result<Option<VerificationSession>> {
        let id = validate_id(id)?;
        let mut sessions = self.sessions.write();
        Ok(sessions.get_mut(id).map(|session| {
            session.merge_hashes(request_hash, response_hash);
            session.clone()
        }))
    }

    /// Replace the stored nonce with one taken from hardware evidence.
    ///
    /// Callers must only pass nonces read from verified attestation evidence,
    /// never client input.
    pub fn sync_nonce(
        &self,
        id: &str,
        attested_nonce: &str,
        request_hash: Option<&str>,
        response_hash: Option<&str>,
    ) -> Result<VerificationSession> {
        let id = validate_id(id)?;
        let nonce = present(Some(attested_nonce))
            .ok_or_else(|| TesseraError::InvalidInput("attested nonce is empty".into()))?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| VerificationSession::new(id));
        if session.nonce.as_deref() != Some(nonce.as_str()) {
            tracing::info!(
                verification_id = id,
                previous = session.nonce.as_deref().unwrap_or("<none>"),
                "session nonce re-synced to attested value"
            );
        }
        session.nonce = Some(nonce);
        session.merge_hashes(request_hash, response_hash);
        Ok(session.clone())
    }

    pub fn clear(&self, id: &str) -> Option<VerificationSession> {
        self.sessions.write().remove(id.trim())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_id(id: &str) -> Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(TesseraError::InvalidInput(
            "verification id must not be empty".into(),
        ));
    }
    Ok(trimmed)
}

fn present(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
