//! The signing oracle interface described in spec §6.
//!
//! The core never holds private key material directly; it calls out to a
//! `Signer`. Implementers may back this with Ed25519 and/or a post-quantum
//! scheme (Dilithium5/Falcon512) selectable per transaction class. Only the
//! Ed25519 reference implementation ships here.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::QuidsError;

pub const SIGNATURE_LEN: usize = 64;

/// Produces a fixed-length signature over an arbitrary message.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, QuidsError>;
    fn public_key(&self) -> Vec<u8>;
}

/// Checks a signature produced by a [`Signer`] counterpart.
pub trait Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 signing oracle backed by `ed25519-dalek`.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a signer from raw 32-byte private key material.
    ///
    /// Fails if the key material is malformed (wrong length).
    pub fn from_bytes(private_key: &[u8]) -> Result<Self, QuidsError> {
        let bytes: [u8; 32] = private_key
            .try_into()
            .map_err(|_| QuidsError::invalid_tx("malformed private key material"))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, QuidsError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }
}

/// Ed25519 verifier backed by `ed25519-dalek`.
#[derive(Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &signature).is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let signer = Ed25519Signer::generate();
        let msg = b"batch of transactions";
        let sig = signer.sign(msg).expect("sign");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(Ed25519Verifier.verify(&signer.public_key(), msg, &sig));
    }

    #[test]
    fn flipped_signature_byte_fails_verification() {
        let signer = Ed25519Signer::generate();
        let msg = b"batch of transactions";
        let mut sig = signer.sign(msg).expect("sign");
        sig[0] ^= 0xFF;
        assert!(!Ed25519Verifier.verify(&signer.public_key(), msg, &sig));
    }

    #[test]
    fn malformed_private_key_is_rejected() {
        assert!(Ed25519Signer::from_bytes(&[0u8; 4]).is_err());
    }
}
