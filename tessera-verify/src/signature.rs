use ed25519_dalek::{Signature as EdSignature, VerifyingKey as EdVerifyingKey};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use tessera_core::error::{Result, TesseraError};
use tessera_core::proof::SignaturePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgo {
    Ecdsa,
    Ed25519,
}

impl SigningAlgo {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "ecdsa" | "secp256k1" => Ok(Self::Ecdsa),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(TesseraError::Verification(format!(
                "unsupported signing algorithm: {other}"
            ))),
        }
    }
}

/// Recovers the signer of a transcript signature.
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Recover the signing address for a provider signature payload.
    ///
    /// For ECDSA this is the `0x`-prefixed lowercase Ethereum address; for
    /// Ed25519 the declared address is the public key, returned lowercase once
    /// the signature checks out.
    pub fn recover(&self, payload: &SignaturePayload) -> Result<String> {
        match SigningAlgo::parse(&payload.signing_algo)? {
            SigningAlgo::Ecdsa => self.recover_ecdsa(payload.text.as_bytes(), &payload.signature),
            SigningAlgo::Ed25519 => self.verify_ed25519(
                &payload.signing_address,
                payload.text.as_bytes(),
                &payload.signature,
            ),
        }
    }

    /// EIP-191 personal-message recovery over secp256k1.
    pub fn recover_ecdsa(&self, message: &[u8], signature_hex: &str) -> Result<String> {
        let bytes = decode_hex(signature_hex)?;
        if bytes.len() != 65 {
            return Err(TesseraError::Verification(format!(
                "signature is {} bytes, expected 65",
                bytes.len()
            )));
        }

        let mut sig = Signature::from_slice(&bytes[..64])
            .map_err(|e| TesseraError::Verification(format!("invalid signature: {e}")))?;
        let v = match bytes[64] {
            27 | 28 => bytes[64] - 27,
            0 | 1 => bytes[64],
            other => {
                return Err(TesseraError::Verification(format!(
                    "invalid recovery id: {other}"
                )));
            }
        };
        let mut recid = RecoveryId::from_byte(v)
            .ok_or_else(|| TesseraError::Verification(format!("invalid recovery id: {v}")))?;

        // high-s signatures recover the negated point
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            recid = RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced());
        }

        let digest = eip191_hash(message);
        let key = VerifyingKey::recover_from_prehash(&digest, &sig, recid)
            .map_err(|e| TesseraError::Verification(format!("recovery failed: {e}")))?;
        Ok(address_of(&key))
    }

    pub fn verify_ed25519(
        &self,
        public_key_hex: &str,
        message: &[u8],
        signature_hex: &str,
    ) -> Result<String> {
        let key_bytes: [u8; 32] = decode_hex(public_key_hex)?
            .try_into()
            .map_err(|_| TesseraError::Verification("ed25519 key must be 32 bytes".into()))?;
        let sig_bytes: [u8; 64] = decode_hex(signature_hex)?
            .try_into()
            .map_err(|_| TesseraError::Verification("ed25519 signature must be 64 bytes".into()))?;

        let key = EdVerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| TesseraError::Verification(format!("invalid public key: {e}")))?;
        let sig = EdSignature::from_bytes(&sig_bytes);
        key.verify_strict(message, &sig)
            .map_err(|_| TesseraError::Verification("ed25519 signature invalid".into()))?;
        Ok(hex::encode(key_bytes))
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// keccak256("\x19Ethereum Signed Message:\n" || len || message)
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    hex::decode(s).map_err(|e| TesseraError::Verification(format!("invalid hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn sign_eip191(key: &SigningKey, message: &str) -> String {
        let digest = eip191_hash(message.as_bytes());
        let (sig, recid) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn recovers_ecdsa_signer() {
        let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let expected = address_of(key.verifying_key());
        let payload = SignaturePayload {
            text: "aa:bb".into(),
            signature: sign_eip191(&key, "aa:bb"),
            signing_address: expected.clone(),
            signing_algo: "ecdsa".into(),
        };
        let recovered = SignatureVerifier::new().recover(&payload).unwrap();
        assert_eq!(recovered, expected);
        assert!(recovered.starts_with("0x"));
        assert_eq!(recovered.len(), 42);
    }

    #[test]
    fn tampered_text_recovers_different_address() {
        let key = SigningKey::from_slice(&[9u8; 32]).unwrap();
        let sig = sign_eip191(&key, "aa:bb");
        let recovered = SignatureVerifier::new()
            .recover_ecdsa(b"aa:bc", &sig)
            .unwrap_or_default();
        assert_ne!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn rejects_malformed_ecdsa() {
        let v = SignatureVerifier::new();
        assert!(v.recover_ecdsa(b"x", "0x1234").is_err());
        assert!(v.recover_ecdsa(b"x", "zz").is_err());
        let mut bad_v = vec![1u8; 64];
        bad_v.push(5);
        assert!(v.recover_ecdsa(b"x", &hex::encode(bad_v)).is_err());
    }

    #[test]
    fn known_address_for_key_one() {
        // private key 0x...01 is a well known test vector
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_slice(&secret).unwrap();
        assert_eq!(
            address_of(key.verifying_key()),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn ed25519_round() {
        use ed25519_dalek::{Signer, SigningKey as EdSigningKey};
        let mut secret = [0u8; 32];
        getrandom::fill(&mut secret).unwrap();
        let key = EdSigningKey::from_bytes(&secret);
        let sig = key.sign(b"aa:bb");
        let payload = SignaturePayload {
            text: "aa:bb".into(),
            signature: hex::encode(sig.to_bytes()),
            signing_address: hex::encode(key.verifying_key().to_bytes()),
            signing_algo: "ed25519".into(),
        };
        let v = SignatureVerifier::new();
        assert_eq!(v.recover(&payload).unwrap(), payload.signing_address);

        let mut forged = payload.clone();
        forged.text = "aa:cc".into();
        assert!(v.recover(&forged).is_err());
    }

    #[test]
    fn unknown_algo_rejected() {
        assert!(SigningAlgo::parse("rsa").is_err());
        assert_eq!(SigningAlgo::parse("").unwrap(), SigningAlgo::Ecdsa);
    }
}
