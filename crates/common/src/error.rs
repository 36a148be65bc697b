use thiserror::Error;

/// The seven error kinds named in the core's error taxonomy.
///
/// Every crate returns this type directly rather than a crate-local wrapper —
/// the boundary only needs the seven kinds to be distinguishable, which a
/// shared enum already gives callers via `matches!`/`if let`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuidsError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("state rule violated: {0}")]
    StateRule(String),

    #[error("proof failure: {0}")]
    ProofFailure(String),

    #[error("consensus failure: {0}")]
    ConsensusFailure(String),

    #[error("overloaded: {0}")]
    Overload(String),

    #[error("io failure: {0}")]
    IoFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl QuidsError {
    pub fn invalid_tx(msg: impl Into<String>) -> Self {
        Self::InvalidTransaction(msg.into())
    }

    pub fn state_rule(msg: impl Into<String>) -> Self {
        Self::StateRule(msg.into())
    }

    pub fn overload(msg: impl Into<String>) -> Self {
        Self::Overload(msg.into())
    }

    pub fn proof_failure(msg: impl Into<String>) -> Self {
        Self::ProofFailure(msg.into())
    }

    pub fn consensus_failure(msg: impl Into<String>) -> Self {
        Self::ConsensusFailure(msg.into())
    }

    pub fn io_failure(msg: impl Into<String>) -> Self {
        Self::IoFailure(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}
