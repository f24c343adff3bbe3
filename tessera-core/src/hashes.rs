use serde::{Deserialize, Serialize};

/// Hex length of a sha256 digest.
const HASH_HEX_LEN: usize = 64;

/// Request/response hash pair recovered from a signed transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptHashes {
    pub request_hash: String,
    pub response_hash: String,
}

/// Recover the request/response hashes embedded in a signed text.
///
/// Tries two 64-char hex runs first (in order of appearance), then falls back
/// to splitting a text with exactly one `:`. Never panics; `None` means no
/// pair could be found.
pub fn extract(signed_text: &str) -> Option<TranscriptHashes> {
    structured(signed_text).or_else(|| split_once_colon(signed_text))
}

fn structured(text: &str) -> Option<TranscriptHashes> {
    let mut runs = text
        .split(|c: char| !c.is_ascii_hexdigit())
        .filter(|run| run.len() == HASH_HEX_LEN);
    let request = runs.next()?;
    let response = runs.next()?;
    Some(TranscriptHashes {
        request_hash: request.to_ascii_lowercase(),
        response_hash: response.to_ascii_lowercase(),
    })
}

fn split_once_colon(text: &str) -> Option<TranscriptHashes> {
    if text.matches(':').count() != 1 {
        return None;
    }
    let (req, res) = text.split_once(':')?;
    let (req, res) = (req.trim(), res.trim());
    if req.is_empty() || res.is_empty() {
        return None;
    }
    Some(TranscriptHashes {
        request_hash: req.to_string(),
        response_hash: res.to_string(),
    })
}

/// Case-insensitive containment used when checking hashes against a signed text.
pub fn text_contains_hash(text: &str, hash: &str) -> bool {
    let hash = hash.trim();
    !hash.is_empty() && text.to_ascii_lowercase().contains(&hash.to_ascii_lowercase())
}
