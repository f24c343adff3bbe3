pub mod error;
pub mod hashes;
pub mod proof;
pub mod report;

pub use error::{Result, TesseraError};
pub use hashes::TranscriptHashes;
pub use proof::{GpuExpectations, HardwareVerificationResult, NonceCheck, SignaturePayload};
pub use report::{AttestationReport, NormalizedReport};
