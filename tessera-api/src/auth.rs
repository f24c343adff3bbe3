use axum::Extension;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

const TOKEN_PREFIX: &str = "tsr_";
const TOKEN_SECRET_LEN: usize = 24;

/// The single bearer token guarding `/v1`. Only its blake3 digest is kept,
/// and `blake3::Hash` equality is constant-time.
pub struct TokenAuthority {
    digest: blake3::Hash,
}

impl TokenAuthority {
    /// Mint a random `tsr_` token. The plaintext is handed back once.
    pub fn generate() -> Result<(Self, String), getrandom::Error> {
        let mut secret = [0u8; TOKEN_SECRET_LEN];
        getrandom::fill(&mut secret)?;
        let hex: String = secret.iter().map(|b| format!("{b:02x}")).collect();
        let token = format!("{TOKEN_PREFIX}{hex}");
        Ok((Self::from_existing(&token), token))
    }

    /// Operator-supplied token, any format.
    pub fn from_existing(token: &str) -> Self {
        Self {
            digest: blake3::hash(token.as_bytes()),
        }
    }

    pub fn verify(&self, provided: &str) -> bool {
        blake3::hash(provided.as_bytes()) == self.digest
    }
}

pub async fn require_auth(
    Extension(auth): Extension<Arc<TokenAuthority>>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(t) if auth.verify(t) => Ok(next.run(req).await),
        _ => {
            tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_verifies() {
        let (auth, token) = TokenAuthority::generate().unwrap();
        assert!(token.starts_with("tsr_"));
        assert_eq!(token.len(), 4 + 2 * TOKEN_SECRET_LEN);
        assert!(auth.verify(&token));
    }

    #[test]
    fn reject_garbage() {
        let (auth, token) = TokenAuthority::generate().unwrap();
        assert!(!auth.verify("not-a-real-token"));
        assert!(!auth.verify(&token.to_uppercase()));
        assert!(!auth.verify(""));
    }

    #[test]
    fn each_generation_is_fresh() {
        let (first, t1) = TokenAuthority::generate().unwrap();
        let (_, t2) = TokenAuthority::generate().unwrap();
        assert_ne!(t1, t2);
        assert!(!first.verify(&t2));
    }

    #[test]
    fn from_existing_verifies() {
        let auth = TokenAuthority::from_existing("operator-secret");
        assert!(auth.verify("operator-secret"));
        assert!(!auth.verify("wrong-token"));
    }
}
