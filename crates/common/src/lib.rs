//! Shared types, hashing, and the signing oracle interface used by every
//! other `quids` crate.

pub mod error;
pub mod signer;
pub mod transaction;

pub use error::QuidsError;
pub use signer::{Ed25519Signer, Ed25519Verifier, Signer, Verifier, SIGNATURE_LEN};
pub use transaction::{Account, Address, Transaction, MAX_DATA_LEN, MAX_GAS_LIMIT, MIN_GAS_LIMIT};
