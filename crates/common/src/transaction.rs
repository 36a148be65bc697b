use serde::{Deserialize, Serialize};

use crate::error::QuidsError;
use crate::signer::{Signer, Verifier, SIGNATURE_LEN};

pub const MIN_GAS_LIMIT: u64 = 21_000;
pub const MAX_GAS_LIMIT: u64 = 15_000_000;
pub const MAX_DATA_LEN: usize = 128 * 1024;

const HASH_CONTEXT: &[u8] = b"QUIDS_TRANSACTION_V1";
const DOMAIN_SENDER: u8 = 0x01;
const DOMAIN_RECIPIENT: u8 = 0x02;
const DOMAIN_AMOUNT: u8 = 0x03;
const DOMAIN_NONCE: u8 = 0x04;
const DOMAIN_GAS_LIMIT: u8 = 0x05;
const DOMAIN_GAS_PRICE: u8 = 0x06;
const DOMAIN_TIMESTAMP: u8 = 0x07;

pub type Address = String;

/// Canonical, immutable transaction record (spec §3).
///
/// Hashing is a keyed Blake3-style digest over a domain-separated encoding:
/// a fixed context tag followed by each field prefixed by a single-byte
/// domain code. Two transactions hash-equal iff all fields are equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub timestamp: u64,
    pub signature: Vec<u8>,
    /// Opaque caller payload (e.g. contract calldata). Not part of the
    /// signed hash domain — it rides alongside the money-movement fields
    /// rather than being covered by them.
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: u64,
        nonce: u64,
        gas_limit: u64,
        gas_price: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            sender,
            recipient,
            amount,
            nonce,
            gas_limit,
            gas_price,
            timestamp,
            signature: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Keyed, domain-separated Blake3 digest of every field but the signature.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(HASH_CONTEXT);

        hasher.update(&[DOMAIN_SENDER]);
        hasher.update(self.sender.as_bytes());

        hasher.update(&[DOMAIN_RECIPIENT]);
        hasher.update(self.recipient.as_bytes());

        hasher.update(&[DOMAIN_AMOUNT]);
        hasher.update(&self.amount.to_le_bytes());

        hasher.update(&[DOMAIN_NONCE]);
        hasher.update(&self.nonce.to_le_bytes());

        hasher.update(&[DOMAIN_GAS_LIMIT]);
        hasher.update(&self.gas_limit.to_le_bytes());

        hasher.update(&[DOMAIN_GAS_PRICE]);
        hasher.update(&self.gas_price.to_le_bytes());

        hasher.update(&[DOMAIN_TIMESTAMP]);
        hasher.update(&self.timestamp.to_le_bytes());

        *hasher.finalize().as_bytes()
    }

    /// `amount + gas_limit * gas_price`, saturating on overflow (spec §3).
    pub fn total_cost(&self) -> u64 {
        self.amount
            .saturating_add(self.gas_limit.saturating_mul(self.gas_price))
    }

    /// Signs the transaction's hash, overwriting any existing signature.
    /// Fails if the signing oracle rejects the key material.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<(), QuidsError> {
        let hash = self.hash();
        self.signature = signer.sign(&hash)?;
        Ok(())
    }

    /// Verifies `self.signature` against the recomputed hash under `public_key`.
    pub fn verify(&self, verifier: &dyn Verifier, public_key: &[u8]) -> bool {
        if self.signature.len() != SIGNATURE_LEN {
            return false;
        }
        verifier.verify(public_key, &self.hash(), &self.signature)
    }

    /// Checks every invariant in spec §3 plus signature length. Does not
    /// check the signature cryptographically (needs a public key); an
    /// absent/empty signature is always invalid — unsigned transactions are
    /// rejected at admission (spec §9's implementer note).
    pub fn is_valid(&self) -> bool {
        !self.sender.is_empty()
            && !self.recipient.is_empty()
            && self.amount > 0
            && self.gas_limit >= MIN_GAS_LIMIT
            && self.gas_limit <= MAX_GAS_LIMIT
            && self.gas_price > 0
            && self.signature.len() == SIGNATURE_LEN
            && self.data.len() <= MAX_DATA_LEN
    }

    /// Length-prefixed, deterministic binary encoding. Round-trips exactly.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_lp_bytes(&mut out, self.sender.as_bytes());
        write_lp_bytes(&mut out, self.recipient.as_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.gas_limit.to_le_bytes());
        out.extend_from_slice(&self.gas_price.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        write_lp_bytes(&mut out, &self.signature);
        write_lp_bytes(&mut out, &self.data);
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, QuidsError> {
        let mut cursor = 0usize;
        let sender = read_lp_string(data, &mut cursor)?;
        let recipient = read_lp_string(data, &mut cursor)?;
        let amount = read_u64(data, &mut cursor)?;
        let nonce = read_u64(data, &mut cursor)?;
        let gas_limit = read_u64(data, &mut cursor)?;
        let gas_price = read_u64(data, &mut cursor)?;
        let timestamp = read_u64(data, &mut cursor)?;
        let signature = read_lp_bytes(data, &mut cursor)?;
        let payload = read_lp_bytes(data, &mut cursor)?;
        Ok(Self {
            sender,
            recipient,
            amount,
            nonce,
            gas_limit,
            gas_price,
            timestamp,
            signature,
            data: payload,
        })
    }
}

fn write_lp_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Result<u64, QuidsError> {
    let end = *cursor + 8;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::invalid_tx("truncated transaction encoding"))?;
    *cursor = end;
    let bytes: [u8; 8] = slice
        .try_into()
        .map_err(|_| QuidsError::invalid_tx("truncated transaction encoding"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_lp_bytes(data: &[u8], cursor: &mut usize) -> Result<Vec<u8>, QuidsError> {
    let len = read_u32(data, cursor)? as usize;
    let end = *cursor + len;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::invalid_tx("truncated transaction encoding"))?;
    *cursor = end;
    Ok(slice.to_vec())
}

fn read_lp_string(data: &[u8], cursor: &mut usize) -> Result<String, QuidsError> {
    let bytes = read_lp_bytes(data, cursor)?;
    String::from_utf8(bytes).map_err(|_| QuidsError::invalid_tx("non-utf8 address"))
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, QuidsError> {
    let end = *cursor + 4;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::invalid_tx("truncated transaction encoding"))?;
    *cursor = end;
    let bytes: [u8; 4] = slice
        .try_into()
        .map_err(|_| QuidsError::invalid_tx("truncated transaction encoding"))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Account state (spec §3). Mutated exclusively via `StateManager`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: u64,
    pub nonce: u64,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            nonce: 0,
        }
    }

    /// Deterministic byte encoding fed into the state root digest.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_lp_bytes(&mut out, self.address.as_bytes());
        out.extend_from_slice(&self.balance.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }
}
