//! Witness selection, signature collection, and threshold consensus on
//! batch proofs — Proof-of-Batch-Proof-Consensus (spec component C9).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use quids_common::{Ed25519Verifier, QuidsError, Verifier};
use quids_zk::{QuantumState, ZKProofEngine};

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub max_transactions: usize,
    pub batch_interval: Duration,
    pub witness_count: usize,
    pub consensus_threshold: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            batch_interval: Duration::from_secs(1),
            witness_count: 7,
            consensus_threshold: 0.67,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchProof {
    pub proof_data: Vec<u8>,
    pub batch_hash: [u8; 32],
    pub timestamp: u64,
    pub transaction_count: usize,
    pub witness_signatures: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchState {
    Open,
    ProofGenerated,
    CollectingVotes,
    Committed,
    Abandoned,
}

#[derive(Clone, Debug)]
pub struct WitnessInfo {
    pub node_id: String,
    pub public_key: Vec<u8>,
    pub reliability_score: f64,
    pub last_active: u64,
}

#[derive(Clone, Debug)]
struct WitnessRecord {
    public_key: Vec<u8>,
    reliability_score: f64,
    last_active: u64,
}

struct Session {
    state: BatchState,
    proof: BatchProof,
    votes: HashMap<String, bool>,
    created_at: u64,
}

/// Running performance counters, recorded under a single lock (spec §5 /
/// `RollupPerformanceMetrics` pattern in the source system).
#[derive(Clone, Debug, Default)]
pub struct ConsensusMetrics {
    pub total_batches_processed: u64,
    pub total_transactions_processed: u64,
    pub witness_participation_rate: f64,
}

#[derive(Default)]
struct MetricsInner {
    total_batches_processed: u64,
    total_transactions_processed: u64,
    votes_cast: u64,
    votes_possible: u64,
}

pub struct BatchConsensus {
    config: BatchConfig,
    pending: RwLock<Vec<Vec<u8>>>,
    witnesses: RwLock<HashMap<String, WitnessRecord>>,
    session: RwLock<Option<Session>>,
    zk: ZKProofEngine,
    metrics: RwLock<MetricsInner>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl BatchConsensus {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            pending: RwLock::new(Vec::new()),
            witnesses: RwLock::new(HashMap::new()),
            session: RwLock::new(None),
            zk: ZKProofEngine::default(),
            metrics: RwLock::new(MetricsInner::default()),
        }
    }

    pub fn metrics(&self) -> ConsensusMetrics {
        let guard = read_lock(&self.metrics);
        let participation_rate = if guard.votes_possible == 0 {
            0.0
        } else {
            guard.votes_cast as f64 / guard.votes_possible as f64
        };
        ConsensusMetrics {
            total_batches_processed: guard.total_batches_processed,
            total_transactions_processed: guard.total_transactions_processed,
            witness_participation_rate: participation_rate,
        }
    }

    /// Enqueues raw transaction bytes. Fails once the queue holds
    /// `max_transactions` undrained entries.
    pub fn add_transaction(&self, tx_bytes: Vec<u8>) -> Result<(), QuidsError> {
        let mut guard = write_lock(&self.pending);
        if guard.len() >= self.config.max_transactions {
            return Err(QuidsError::overload("batch transaction queue is full"));
        }
        guard.push(tx_bytes);
        Ok(())
    }

    /// Drains up to `max_transactions`, hashes each entry, binds them into
    /// `batch_hash`, and produces a ZK batch proof with no signatures yet.
    pub fn generate_batch_proof(&self) -> Result<BatchProof, QuidsError> {
        let drained: Vec<Vec<u8>> = {
            let mut guard = write_lock(&self.pending);
            let take = guard.len().min(self.config.max_transactions);
            guard.drain(..take).collect()
        };

        let tx_hashes: Vec<[u8; 32]> = drained.iter().map(|tx| *blake3::hash(tx).as_bytes()).collect();
        let mut hasher = blake3::Hasher::new();
        for h in &tx_hashes {
            hasher.update(h);
        }
        let batch_hash = *hasher.finalize().as_bytes();

        let commitment = encode_commitment(&batch_hash)?;
        let zk_proof = self.zk.generate_proof(&commitment)?;

        let proof = BatchProof {
            proof_data: zk_proof.proof_data,
            batch_hash,
            timestamp: now_millis(),
            transaction_count: drained.len(),
            witness_signatures: Vec::new(),
        };

        let mut session = write_lock(&self.session);
        *session = Some(Session {
            state: BatchState::ProofGenerated,
            proof: proof.clone(),
            votes: HashMap::new(),
            created_at: now_millis(),
        });
        drop(session);

        let mut metrics = write_lock(&self.metrics);
        metrics.total_batches_processed += 1;
        metrics.total_transactions_processed += proof.transaction_count as u64;
        metrics.votes_possible += self.config.witness_count as u64;

        Ok(proof)
    }

    pub fn register_witness(&self, node_id: impl Into<String>, public_key: Vec<u8>) {
        let mut guard = write_lock(&self.witnesses);
        guard.insert(
            node_id.into(),
            WitnessRecord {
                public_key,
                reliability_score: 1.0,
                last_active: now_millis(),
            },
        );
    }

    /// Weighted (by reliability), without-replacement selection of
    /// `witness_count` witnesses, using the system RNG.
    pub fn select_witnesses(&self) -> Vec<WitnessInfo> {
        self.select_witnesses_with_rng(&mut StdRng::from_entropy())
    }

    /// Same as [`Self::select_witnesses`] but with an injected PRNG, so
    /// tests can seed it deterministically.
    pub fn select_witnesses_with_rng(&self, rng: &mut dyn RngCore) -> Vec<WitnessInfo> {
        let guard = read_lock(&self.witnesses);
        let mut pool: Vec<(String, WitnessRecord)> =
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        drop(guard);

        let mut selected = Vec::new();
        for _ in 0..self.config.witness_count.min(pool.len()) {
            let total_weight: f64 = pool.iter().map(|(_, r)| r.reliability_score.max(0.0)).sum();
            if total_weight <= 0.0 {
                break;
            }
            let target = rng.gen_range(0.0..total_weight);
            let mut cumulative = 0.0;
            let mut pick_index = pool.len() - 1;
            for (i, (_, record)) in pool.iter().enumerate() {
                cumulative += record.reliability_score.max(0.0);
                if target < cumulative {
                    pick_index = i;
                    break;
                }
            }
            let (node_id, record) = pool.swap_remove(pick_index);
            selected.push(WitnessInfo {
                node_id,
                public_key: record.public_key,
                reliability_score: record.reliability_score,
                last_active: record.last_active,
            });
        }

        if let Some(session) = write_lock(&self.session).as_mut() {
            if session.state == BatchState::ProofGenerated {
                session.state = BatchState::CollectingVotes;
            }
        }

        selected
    }

    /// Verifies `signature` against the witness's stored public key over
    /// `proof.batch_hash`, records the vote, and updates the witness's
    /// reliability via EMA (`r <- 0.9*r + 0.1*(success ? 1 : 0)`).
    pub fn submit_witness_vote(
        &self,
        witness_id: &str,
        signature: &[u8],
        proof: &BatchProof,
    ) -> Result<bool, QuidsError> {
        let public_key = {
            let guard = read_lock(&self.witnesses);
            guard
                .get(witness_id)
                .map(|r| r.public_key.clone())
                .ok_or_else(|| QuidsError::ConsensusFailure(format!("unknown witness {witness_id}")))?
        };

        let valid = Ed25519Verifier.verify(&public_key, &proof.batch_hash, signature);

        {
            let mut guard = write_lock(&self.witnesses);
            if let Some(record) = guard.get_mut(witness_id) {
                record.reliability_score = 0.9 * record.reliability_score + 0.1 * if valid { 1.0 } else { 0.0 };
                record.last_active = now_millis();
            }
        }

        let mut session_guard = write_lock(&self.session);
        if let Some(session) = session_guard.as_mut() {
            if session.proof.batch_hash == proof.batch_hash {
                session.votes.insert(witness_id.to_string(), valid);
                if valid {
                    session.proof.witness_signatures.push(signature.to_vec());
                }
            }
        }
        drop(session_guard);

        write_lock(&self.metrics).votes_cast += 1;

        Ok(valid)
    }

    /// True iff `valid_signatures / witness_count >= consensus_threshold`.
    /// Marks the active session committed as a side effect when reached.
    pub fn has_reached_consensus(&self, proof: &BatchProof) -> bool {
        let fraction = self.confidence(proof);
        let reached = fraction >= self.config.consensus_threshold;
        if reached {
            let mut session_guard = write_lock(&self.session);
            if let Some(session) = session_guard.as_mut() {
                if session.proof.batch_hash == proof.batch_hash {
                    session.state = BatchState::Committed;
                }
            }
        }
        reached
    }

    /// Fraction of valid signatures out of `witness_count`.
    pub fn confidence(&self, proof: &BatchProof) -> f64 {
        let session_guard = read_lock(&self.session);
        let valid_votes = session_guard
            .as_ref()
            .filter(|s| s.proof.batch_hash == proof.batch_hash)
            .map(|s| s.votes.values().filter(|v| **v).count())
            .unwrap_or(0);
        valid_votes as f64 / self.config.witness_count as f64
    }

    /// Marks the active session abandoned if `batch_interval * 3` has
    /// elapsed without reaching consensus.
    pub fn expire_if_abandoned(&self) -> bool {
        let mut session_guard = write_lock(&self.session);
        let Some(session) = session_guard.as_mut() else {
            return false;
        };
        if session.state == BatchState::Committed || session.state == BatchState::Abandoned {
            return session.state == BatchState::Abandoned;
        }
        let deadline_ms = self.config.batch_interval.as_millis() as u64 * 3;
        if now_millis().saturating_sub(session.created_at) > deadline_ms {
            session.state = BatchState::Abandoned;
            true
        } else {
            false
        }
    }

    pub fn current_state(&self) -> Option<BatchState> {
        read_lock(&self.session).as_ref().map(|s| s.state.clone())
    }

    /// The active session's proof, including every witness signature
    /// collected so far — unlike the value returned by
    /// [`Self::generate_batch_proof`], which is a snapshot taken before any
    /// votes arrive.
    pub fn current_proof(&self) -> Option<BatchProof> {
        read_lock(&self.session).as_ref().map(|s| s.proof.clone())
    }
}

fn encode_commitment(batch_hash: &[u8; 32]) -> Result<QuantumState, QuidsError> {
    let mut amplitudes: Vec<(f64, f64)> = batch_hash
        .chunks(2)
        .map(|chunk| {
            let re = (chunk[0] as f64 - 128.0) / 128.0;
            let im = chunk.get(1).map_or(0.0, |&b| (b as f64 - 128.0) / 128.0);
            (re, im)
        })
        .collect();
    amplitudes[0].0 += 1e-9;
    QuantumState::new(amplitudes).map_err(|e| QuidsError::ProofFailure(e.to_string()))
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quids_common::{Ed25519Signer, Signer};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn five_of_seven_reaches_consensus_four_does_not() {
        let consensus = BatchConsensus::new(BatchConfig::default());
        consensus.add_transaction(b"tx-a".to_vec()).expect("enqueue");
        let proof = consensus.generate_batch_proof().expect("proof");

        let signers: Vec<Ed25519Signer> = (0..7).map(|_| Ed25519Signer::generate()).collect();
        for (i, signer) in signers.iter().enumerate() {
            consensus.register_witness(format!("w{i}"), signer.public_key());
        }

        for (i, signer) in signers.iter().take(4).enumerate() {
            let sig = signer.sign(&proof.batch_hash).expect("sign");
            consensus
                .submit_witness_vote(&format!("w{i}"), &sig, &proof)
                .expect("vote");
        }
        assert!(!consensus.has_reached_consensus(&proof));

        let sig = signers[4].sign(&proof.batch_hash).expect("sign");
        consensus
            .submit_witness_vote("w4", &sig, &proof)
            .expect("vote");
        assert!(consensus.has_reached_consensus(&proof));
    }

    #[test]
    fn invalid_signature_does_not_count_toward_consensus() {
        let consensus = BatchConsensus::new(BatchConfig::default());
        let proof = consensus.generate_batch_proof().expect("proof");

        let signer = Ed25519Signer::generate();
        consensus.register_witness("w0", signer.public_key());
        let bogus_signature = vec![0u8; quids_common::SIGNATURE_LEN];
        let valid = consensus
            .submit_witness_vote("w0", &bogus_signature, &proof)
            .expect("vote");
        assert!(!valid);
        assert_eq!(consensus.confidence(&proof), 0.0);
    }

    #[test]
    fn current_proof_accumulates_valid_witness_signatures() {
        let consensus = BatchConsensus::new(BatchConfig::default());
        let proof = consensus.generate_batch_proof().expect("proof");

        let signer = Ed25519Signer::generate();
        consensus.register_witness("w0", signer.public_key());
        let sig = signer.sign(&proof.batch_hash).expect("sign");
        consensus.submit_witness_vote("w0", &sig, &proof).expect("vote");

        let bogus = Ed25519Signer::generate();
        consensus.register_witness("w1", bogus.public_key());
        consensus
            .submit_witness_vote("w1", &[0u8; quids_common::SIGNATURE_LEN], &proof)
            .expect("vote");

        let current = consensus.current_proof().expect("session");
        assert_eq!(current.witness_signatures, vec![sig]);
    }

    #[test]
    fn select_witnesses_is_deterministic_given_a_seed() {
        let consensus = BatchConsensus::new(BatchConfig::default());
        for i in 0..5 {
            consensus.register_witness(format!("w{i}"), vec![i as u8]);
        }
        let first = consensus.select_witnesses_with_rng(&mut ChaCha8Rng::seed_from_u64(1));
        let second = consensus.select_witnesses_with_rng(&mut ChaCha8Rng::seed_from_u64(1));
        let ids_first: Vec<_> = first.iter().map(|w| w.node_id.clone()).collect();
        let ids_second: Vec<_> = second.iter().map(|w| w.node_id.clone()).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn queue_rejects_transactions_past_capacity() {
        let config = BatchConfig {
            max_transactions: 2,
            ..BatchConfig::default()
        };
        let consensus = BatchConsensus::new(config);
        consensus.add_transaction(b"a".to_vec()).expect("enqueue");
        consensus.add_transaction(b"b".to_vec()).expect("enqueue");
        assert!(consensus.add_transaction(b"c".to_vec()).is_err());
    }
}
