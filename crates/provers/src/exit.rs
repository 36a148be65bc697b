use quids_common::QuidsError;
use quids_state::StateManager;
use quids_zk::{VerificationResult, ZKProof, ZKProofEngine};

use crate::commitment::encode_account;

/// Account-specific withdrawal proof against a state root (spec component
/// C7). Lets an account holder prove their balance and exit without
/// depending on sequencer liveness.
#[derive(Clone, Debug, PartialEq)]
pub struct ExitProof {
    pub account_address: String,
    pub balance: u64,
    pub state_root: [u8; 32],
    pub validity_proof: ZKProof,
}

pub struct EmergencyExitProver<'a> {
    zk: &'a ZKProofEngine,
}

impl<'a> EmergencyExitProver<'a> {
    pub fn new(zk: &'a ZKProofEngine) -> Self {
        Self { zk }
    }

    pub fn generate_exit_proof(
        &self,
        address: &str,
        state: &StateManager,
    ) -> Result<ExitProof, QuidsError> {
        let account = state.get_account(address);
        let commitment = encode_account(&account)?;
        let validity_proof = self.zk.generate_proof(&commitment)?;

        Ok(ExitProof {
            account_address: address.to_string(),
            balance: account.balance,
            state_root: state.state_root(),
            validity_proof,
        })
    }

    /// Recomputes `state`'s root and the account's commitment, and checks
    /// both against the claim: the embedded ZK proof must check out against
    /// the account encoding, the claimed balance must match the account's
    /// actual balance, and the claimed state root must match the state's
    /// actual root. Without the root check an attacker could pair a stale
    /// or fabricated `state_root` with a genuine current account and still
    /// pass verification.
    pub fn verify_exit_proof(&self, proof: &ExitProof, state: &StateManager) -> bool {
        let account = state.get_account(&proof.account_address);
        let Ok(commitment) = encode_account(&account) else {
            return false;
        };
        let details = self.zk.verify_proof(&proof.validity_proof, &commitment);
        details.result == VerificationResult::Valid
            && account.balance == proof.balance
            && state.state_root() == proof.state_root
    }

    /// Zeroes the account's balance in `state`, preventing a second exit
    /// against the same funds.
    pub fn process_emergency_exit(&self, proof: &ExitProof, state: &StateManager) {
        let mut account = state.get_account(&proof.account_address);
        account.balance = 0;
        state.add_account(proof.account_address.clone(), account);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quids_common::Account;

    fn state_with_alice(balance: u64) -> StateManager {
        let state = StateManager::new();
        let mut alice = Account::new("alice".to_string());
        alice.balance = balance;
        state.add_account("alice".to_string(), alice);
        state
    }

    #[test]
    fn exit_proof_verifies_then_zeroes_balance() {
        let zk = ZKProofEngine::default();
        let prover = EmergencyExitProver::new(&zk);
        let state = state_with_alice(1_000);

        let proof = prover
            .generate_exit_proof("alice", &state)
            .expect("generate");
        assert_eq!(proof.balance, 1_000);
        assert!(prover.verify_exit_proof(&proof, &state));

        prover.process_emergency_exit(&proof, &state);
        assert_eq!(state.get_account("alice").balance, 0);
        assert_eq!(proof.balance, 1_000);
    }

    #[test]
    fn verification_rejects_a_state_whose_root_does_not_match_the_claim() {
        let zk = ZKProofEngine::default();
        let prover = EmergencyExitProver::new(&zk);
        let state = state_with_alice(1_000);

        let proof = prover
            .generate_exit_proof("alice", &state)
            .expect("generate");

        // A later state where the account balance coincidentally still
        // matches the claim, but the root has moved on (another account
        // changed), must still fail verification.
        let mut bob = Account::new("bob".to_string());
        bob.balance = 1;
        state.add_account("bob".to_string(), bob);

        assert_ne!(state.state_root(), proof.state_root);
        assert!(!prover.verify_exit_proof(&proof, &state));
    }
}
