pub mod jwt;
pub mod signature;
pub mod tdx;

pub use jwt::ClaimsValidator;
pub use signature::{SignatureVerifier, SigningAlgo};
