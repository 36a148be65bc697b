//! Zero-knowledge measurement proofs over an abstract "quantum-state"
//! commitment (spec component C4).
//!
//! The commitment is an opaque normalized vector of complex amplitudes;
//! there is no real quantum backend behind it, only a deterministic
//! simulation of phase rotation and measurement. Thresholds (tolerance
//! 0.10, fidelity 0.9, confidence 0.95) are carried over from the source
//! system as-is; they were flagged there as needing a security review that
//! never happened, so this implementation keeps them tunable rather than
//! hard-coded.

use std::sync::RwLock;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use quids_common::QuidsError;

/// A single complex amplitude, `(re, im)`.
pub type Amplitude = (f64, f64);

/// Opaque commitment: a normalized vector of complex amplitudes of fixed
/// dimension. Implementers are free to interpret the vector however the
/// upstream protocol requires; this engine only needs its dimension and
/// per-index magnitude/phase.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantumState {
    amplitudes: Vec<Amplitude>,
}

impl QuantumState {
    /// Normalizes `amplitudes` to unit norm. Errors on an empty vector.
    pub fn new(amplitudes: Vec<Amplitude>) -> Result<Self, QuidsError> {
        if amplitudes.is_empty() {
            return Err(QuidsError::ProofFailure(
                "quantum state must have nonzero dimension".into(),
            ));
        }
        let norm_sq: f64 = amplitudes.iter().map(|(re, im)| re * re + im * im).sum();
        let norm = norm_sq.sqrt();
        if norm == 0.0 {
            return Err(QuidsError::ProofFailure(
                "quantum state amplitude vector is zero".into(),
            ));
        }
        let amplitudes = amplitudes
            .into_iter()
            .map(|(re, im)| (re / norm, im / norm))
            .collect();
        Ok(Self { amplitudes })
    }

    pub fn dimension(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn amplitude(&self, index: usize) -> Option<Amplitude> {
        self.amplitudes.get(index).copied()
    }
}

/// Proof produced by [`ZKProofEngine::generate_proof`].
#[derive(Clone, Debug, PartialEq)]
pub struct ZKProof {
    pub measurement_qubits: Vec<usize>,
    pub measurement_outcomes: Vec<bool>,
    pub phase_angles: Vec<f64>,
    pub proof_data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationResult {
    Valid,
    Invalid,
    Inconclusive,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerificationDetails {
    pub result: VerificationResult,
    pub confidence: f64,
    pub fidelity: f64,
    pub matching_measurements: usize,
    pub total_measurements: usize,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub measurement_tolerance: f64,
    pub fidelity_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            measurement_tolerance: 0.10,
            fidelity_threshold: 0.9,
            confidence_threshold: 0.95,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct OptimalParameters {
    phase_angles: Vec<f64>,
    measurement_qubits: usize,
    best_verification_time: f64,
    best_success_rate: f64,
    has_value: bool,
}

/// Generates and verifies [`ZKProof`]s over [`QuantumState`] commitments.
pub struct ZKProofEngine {
    config: EngineConfig,
    optimal: RwLock<OptimalParameters>,
}

impl Default for ZKProofEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ZKProofEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            optimal: RwLock::new(OptimalParameters::default()),
        }
    }

    /// Generates a proof over `state` using the system RNG.
    pub fn generate_proof(&self, state: &QuantumState) -> Result<ZKProof, QuidsError> {
        self.generate_proof_with_rng(state, &mut StdRng::from_entropy())
    }

    /// Generates a proof using a caller-supplied PRNG, so tests can seed it
    /// deterministically (source used module-level randomness; this injects
    /// it as a typed handle instead).
    pub fn generate_proof_with_rng(
        &self,
        state: &QuantumState,
        rng: &mut dyn RngCore,
    ) -> Result<ZKProof, QuidsError> {
        let dimension = state.dimension();
        if dimension == 0 {
            return Err(QuidsError::ProofFailure("empty quantum state".into()));
        }

        let n_qubits = measurement_count(dimension);
        let measurement_qubits = sample_distinct_indices(rng, dimension, n_qubits);
        let phase_angles: Vec<f64> = (0..measurement_qubits.len())
            .map(|_| rng.gen_range(0.0..std::f64::consts::TAU))
            .collect();

        let measurement_outcomes: Vec<bool> = measurement_qubits
            .iter()
            .zip(phase_angles.iter())
            .map(|(&qubit, &angle)| {
                let amplitude = state.amplitude(qubit).unwrap_or((0.0, 0.0));
                measure(amplitude, angle)
            })
            .collect();

        let proof_data = encode_proof(&measurement_qubits, &measurement_outcomes, &phase_angles);

        Ok(ZKProof {
            measurement_qubits,
            measurement_outcomes,
            phase_angles,
            proof_data,
        })
    }

    /// Reapplies the phase transformation recorded in `proof` to
    /// `claimed_state`, re-simulates the recorded measurements, and accepts
    /// if the matching fraction and derived fidelity/confidence clear the
    /// engine's thresholds.
    pub fn verify_proof(&self, proof: &ZKProof, claimed_state: &QuantumState) -> VerificationDetails {
        let total = proof.measurement_qubits.len();
        if total == 0
            || proof.measurement_outcomes.len() != total
            || proof.phase_angles.len() != total
        {
            return VerificationDetails {
                result: VerificationResult::Inconclusive,
                confidence: 0.0,
                fidelity: 0.0,
                matching_measurements: 0,
                total_measurements: total,
            };
        }

        let mut matching = 0usize;
        for ((&qubit, &expected), &angle) in proof
            .measurement_qubits
            .iter()
            .zip(proof.measurement_outcomes.iter())
            .zip(proof.phase_angles.iter())
        {
            let Some(amplitude) = claimed_state.amplitude(qubit) else {
                continue;
            };
            if measure(amplitude, angle) == expected {
                matching += 1;
            }
        }

        let match_fraction = matching as f64 / total as f64;
        let fidelity = fidelity_score(claimed_state, &proof.measurement_qubits);
        let confidence = (match_fraction + fidelity) / 2.0;

        let result = if match_fraction >= 1.0 - self.config.measurement_tolerance
            && fidelity >= self.config.fidelity_threshold
            && confidence >= self.config.confidence_threshold
        {
            VerificationResult::Valid
        } else {
            VerificationResult::Invalid
        };

        VerificationDetails {
            result,
            confidence,
            fidelity,
            matching_measurements: matching,
            total_measurements: total,
        }
    }

    /// Replaces the stored best phase-angle vector and qubit count iff the
    /// new observation's joint score (success rate weighted by speed)
    /// dominates the current best.
    pub fn update_optimal_parameters(
        &self,
        phase_angles: Vec<f64>,
        measurement_qubits: usize,
        verification_time_secs: f64,
        success_rate: f64,
    ) {
        let new_score = joint_score(verification_time_secs, success_rate);
        let mut optimal = match self.optimal.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current_score = joint_score(optimal.best_verification_time, optimal.best_success_rate);
        if !optimal.has_value || new_score > current_score {
            optimal.phase_angles = phase_angles;
            optimal.measurement_qubits = measurement_qubits;
            optimal.best_verification_time = verification_time_secs;
            optimal.best_success_rate = success_rate;
            optimal.has_value = true;
        }
    }

    pub fn optimal_phase_angles(&self) -> Vec<f64> {
        match self.optimal.read() {
            Ok(guard) => guard.phase_angles.clone(),
            Err(poisoned) => poisoned.into_inner().phase_angles.clone(),
        }
    }

    pub fn optimal_measurement_qubits(&self) -> usize {
        match self.optimal.read() {
            Ok(guard) => guard.measurement_qubits,
            Err(poisoned) => poisoned.into_inner().measurement_qubits,
        }
    }
}

fn joint_score(verification_time_secs: f64, success_rate: f64) -> f64 {
    success_rate / (1.0 + verification_time_secs.max(0.0))
}

fn measurement_count(dimension: usize) -> usize {
    let log2 = (dimension as f64).log2().ceil() as usize;
    log2.clamp(1, dimension)
}

fn sample_distinct_indices(rng: &mut dyn RngCore, dimension: usize, count: usize) -> Vec<usize> {
    let mut chosen = Vec::with_capacity(count);
    let mut remaining: Vec<usize> = (0..dimension).collect();
    for _ in 0..count.min(dimension) {
        let pick = rng.gen_range(0..remaining.len());
        chosen.push(remaining.swap_remove(pick));
    }
    chosen.sort_unstable();
    chosen
}

/// Deterministic pseudo-measurement: rotates `amplitude` by `angle` and
/// reads off the sign comparison between the rotated real and imaginary
/// parts. Reproducible given the same amplitude and angle.
fn measure(amplitude: Amplitude, angle: f64) -> bool {
    let (re, im) = amplitude;
    let (sin_a, cos_a) = angle.sin_cos();
    let rotated_re = re * cos_a - im * sin_a;
    let rotated_im = re * sin_a + im * cos_a;
    rotated_re >= rotated_im
}

fn fidelity_score(state: &QuantumState, qubits: &[usize]) -> f64 {
    if qubits.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = qubits
        .iter()
        .filter_map(|&q| state.amplitude(q))
        .map(|(re, im)| re * re + im * im)
        .sum();
    (total_weight / qubits.len() as f64).min(1.0)
}

fn encode_proof(qubits: &[usize], outcomes: &[bool], angles: &[f64]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(qubits.len() as u32).to_le_bytes());
    for &q in qubits {
        out.extend_from_slice(&(q as u64).to_le_bytes());
    }
    for &bit in outcomes {
        out.push(u8::from(bit));
    }
    for &angle in angles {
        out.extend_from_slice(&angle.to_le_bytes());
    }
    out
}
