//! Deterministic encoding of rollup state into the opaque quantum-state
//! commitment consumed by [`quids_zk::ZKProofEngine`].

use quids_common::{Account, Transaction, QuidsError};
use quids_zk::{Amplitude, QuantumState};

/// Spreads `bytes` into a fixed-size amplitude vector. Any two distinct byte
/// strings almost certainly produce distinct states, which is all the
/// engine needs from a commitment.
///
/// A tiny bias keeps the first amplitude away from exact zero so the vector
/// is never the zero vector regardless of input.
pub fn encode_bytes(bytes: &[u8]) -> Result<QuantumState, QuidsError> {
    let mut amplitudes: Vec<Amplitude> = bytes
        .chunks(2)
        .map(|chunk| {
            let re = (chunk[0] as f64 - 128.0) / 128.0;
            let im = chunk.get(1).map_or(0.0, |&b| (b as f64 - 128.0) / 128.0);
            (re, im)
        })
        .collect();
    if amplitudes.is_empty() {
        amplitudes.push((0.0, 0.0));
    }
    amplitudes[0].0 += 1e-9;
    QuantumState::new(amplitudes)
}

pub fn encode_state_diff(pre_root: &[u8; 32], post_root: &[u8; 32]) -> Result<QuantumState, QuidsError> {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(pre_root);
    bytes.extend_from_slice(post_root);
    encode_bytes(&bytes)
}

pub fn encode_batch(transactions: &[Transaction]) -> Result<QuantumState, QuidsError> {
    let mut bytes = Vec::new();
    for tx in transactions {
        bytes.extend_from_slice(&tx.hash());
    }
    encode_bytes(&bytes)
}

pub fn encode_account(account: &Account) -> Result<QuantumState, QuidsError> {
    encode_bytes(&account.serialize())
}
