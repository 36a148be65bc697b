//! Lossless codec over a transaction sequence with integrity hashing
//! (spec component C3). The algorithm is pluggable; Zstd backs the default
//! implementation.

use sha2::{Digest, Sha256};

use quids_common::{QuidsError, Transaction};

const ZSTD_LEVEL: i32 = 3;

/// A compressed transaction batch plus enough metadata to detect tampering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedBatch {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub hash: [u8; 32],
}

/// Encodes a transaction sequence to its length-prefixed wire form, then
/// compresses it with Zstd. Decompression verifies both the blob hash and
/// the original size before decoding; `decompress(compress(xs)) == xs`.
pub struct DataCompressor;

impl DataCompressor {
    pub fn compress_batch(transactions: &[Transaction]) -> Result<CompressedBatch, QuidsError> {
        let mut plain = Vec::new();
        plain.extend_from_slice(&(transactions.len() as u32).to_le_bytes());
        for tx in transactions {
            let bytes = tx.serialize();
            plain.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            plain.extend_from_slice(&bytes);
        }
        let original_size = plain.len();

        let compressed_data = zstd::stream::encode_all(plain.as_slice(), ZSTD_LEVEL)
            .map_err(|e| QuidsError::IoFailure(format!("zstd compress: {e}")))?;

        let hash = hash_blob(&compressed_data);

        Ok(CompressedBatch {
            compressed_data,
            original_size,
            hash,
        })
    }

    pub fn decompress_batch(batch: &CompressedBatch) -> Result<Vec<Transaction>, QuidsError> {
        if hash_blob(&batch.compressed_data) != batch.hash {
            return Err(QuidsError::IoFailure(
                "compressed blob hash mismatch".into(),
            ));
        }

        let plain = zstd::stream::decode_all(batch.compressed_data.as_slice())
            .map_err(|e| QuidsError::IoFailure(format!("zstd decompress: {e}")))?;

        if plain.len() != batch.original_size {
            return Err(QuidsError::IoFailure(
                "decompressed size does not match recorded original size".into(),
            ));
        }

        let mut cursor = 0usize;
        let count = read_u32(&plain, &mut cursor)? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u32(&plain, &mut cursor)? as usize;
            let end = cursor + len;
            let slice = plain
                .get(cursor..end)
                .ok_or_else(|| QuidsError::IoFailure("truncated batch payload".into()))?;
            out.push(Transaction::deserialize(slice)?);
            cursor = end;
        }
        Ok(out)
    }
}

fn hash_blob(blob: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(blob);
    hasher.finalize().into()
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, QuidsError> {
    let end = *cursor + 4;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::IoFailure("truncated batch payload".into()))?;
    *cursor = end;
    let bytes: [u8; 4] = slice
        .try_into()
        .map_err(|_| QuidsError::IoFailure("truncated batch payload".into()))?;
    Ok(u32::from_le_bytes(bytes))
}
