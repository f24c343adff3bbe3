pub mod nonce;
pub mod session;
pub mod state;

pub use nonce::{AttestedNonce, NonceResyncPolicy, NonceSource};
pub use session::{SessionStore, VerificationSession};
pub use state::{
    AttestationSummary, DeriveInput, OverallStatus, StepKind, StepStatus, VerificationState,
    VerificationStep, derive,
};
