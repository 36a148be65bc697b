//! State-transition, fraud, and emergency-exit provers (spec components
//! C5-C7), all built atop the same quantum-state commitment encoding.

pub mod commitment;
pub mod exit;
pub mod fraud;
pub mod transition;

pub use exit::{EmergencyExitProver, ExitProof};
pub use fraud::{FraudProver, FraudVerificationResult, InvalidTransitionProof};
pub use transition::{StateTransitionProof, StateTransitionProver, verify_transaction_sequence};
