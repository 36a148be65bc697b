//! Outbound pub/sub to whatever peer-broadcast layer a deployment wires in.
//! Wire protocols between chains are out of scope here (spec §1's
//! Non-goals) — a `Broadcaster` only ships named-topic byte payloads; what
//! a counterparty chain does with them is its own concern.

use std::fmt::Debug;

use tokio::sync::broadcast;

use quids_common::QuidsError;

/// The four topics the core publishes to or reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Tx,
    StateUpdate,
    BridgeMsg,
    WitnessVote,
}

/// Envelope describing a committed batch, published on [`Topic::BridgeMsg`].
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeMessage {
    pub batch_sequence: u64,
    pub state_root: [u8; 32],
    pub transaction_count: usize,
    pub witness_signatures: Vec<Vec<u8>>,
}

impl BridgeMessage {
    /// Length-prefixed, deterministic binary encoding, matching
    /// `Transaction`'s wire format. Round-trips exactly.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.batch_sequence.to_le_bytes());
        out.extend_from_slice(&self.state_root);
        out.extend_from_slice(&(self.transaction_count as u64).to_le_bytes());
        out.extend_from_slice(&(self.witness_signatures.len() as u32).to_le_bytes());
        for signature in &self.witness_signatures {
            out.extend_from_slice(&(signature.len() as u32).to_le_bytes());
            out.extend_from_slice(signature);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, QuidsError> {
        let mut cursor = 0usize;
        let batch_sequence = read_u64(data, &mut cursor)?;
        let state_root = read_state_root(data, &mut cursor)?;
        let transaction_count = read_u64(data, &mut cursor)? as usize;
        let signature_count = read_u32(data, &mut cursor)?;
        let mut witness_signatures = Vec::with_capacity(signature_count as usize);
        for _ in 0..signature_count {
            witness_signatures.push(read_lp_bytes(data, &mut cursor)?);
        }
        Ok(Self {
            batch_sequence,
            state_root,
            transaction_count,
            witness_signatures,
        })
    }
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Result<u64, QuidsError> {
    let end = *cursor + 8;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::io_failure("truncated bridge message encoding"))?;
    *cursor = end;
    let bytes: [u8; 8] = slice
        .try_into()
        .map_err(|_| QuidsError::io_failure("truncated bridge message encoding"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, QuidsError> {
    let end = *cursor + 4;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::io_failure("truncated bridge message encoding"))?;
    *cursor = end;
    let bytes: [u8; 4] = slice
        .try_into()
        .map_err(|_| QuidsError::io_failure("truncated bridge message encoding"))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_state_root(data: &[u8], cursor: &mut usize) -> Result<[u8; 32], QuidsError> {
    let end = *cursor + 32;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::io_failure("truncated bridge message encoding"))?;
    *cursor = end;
    slice
        .try_into()
        .map_err(|_| QuidsError::io_failure("truncated bridge message encoding"))
}

fn read_lp_bytes(data: &[u8], cursor: &mut usize) -> Result<Vec<u8>, QuidsError> {
    let len = read_u32(data, cursor)? as usize;
    let end = *cursor + len;
    let slice = data
        .get(*cursor..end)
        .ok_or_else(|| QuidsError::io_failure("truncated bridge message encoding"))?;
    *cursor = end;
    Ok(slice.to_vec())
}

/// Publish/subscribe seam over named topics (spec §6: `broadcast(topic,
/// bytes)` / `subscribe(topic, handler)`). `subscribe` hands back a
/// receiver rather than taking a callback directly — idiomatic for an
/// object-safe async trait, and a caller can still drive a handler off of
/// it with a `while let Ok(bytes) = receiver.recv().await` loop.
#[async_trait::async_trait]
pub trait Broadcaster: Debug + Send + Sync {
    async fn broadcast(&self, topic: Topic, bytes: Vec<u8>) -> Result<(), QuidsError>;
    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Vec<u8>>;
}

/// Discards every message. Default for deployments with no downstream
/// consumer configured. `subscribe` still hands back a receiver (so the
/// interface is never partially usable), but nothing is ever sent to it.
#[derive(Debug)]
pub struct NullBroadcaster {
    idle: broadcast::Sender<Vec<u8>>,
}

impl Default for NullBroadcaster {
    fn default() -> Self {
        Self {
            idle: broadcast::channel(1).0,
        }
    }
}

#[async_trait::async_trait]
impl Broadcaster for NullBroadcaster {
    async fn broadcast(&self, _topic: Topic, _bytes: Vec<u8>) -> Result<(), QuidsError> {
        Ok(())
    }

    fn subscribe(&self, _topic: Topic) -> broadcast::Receiver<Vec<u8>> {
        self.idle.subscribe()
    }
}

/// One bounded `tokio::sync::broadcast` channel per topic; `broadcast`
/// publishes onto the matching channel and `subscribe` hands out a fresh
/// receiver for it.
#[derive(Debug)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Vec<u8>>,
    state_update: broadcast::Sender<Vec<u8>>,
    bridge_msg: broadcast::Sender<Vec<u8>>,
    witness_vote: broadcast::Sender<Vec<u8>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            state_update: broadcast::channel(capacity).0,
            bridge_msg: broadcast::channel(capacity).0,
            witness_vote: broadcast::channel(capacity).0,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Vec<u8>> {
        match topic {
            Topic::Tx => &self.tx,
            Topic::StateUpdate => &self.state_update,
            Topic::BridgeMsg => &self.bridge_msg,
            Topic::WitnessVote => &self.witness_vote,
        }
    }
}

#[async_trait::async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn broadcast(&self, topic: Topic, bytes: Vec<u8>) -> Result<(), QuidsError> {
        // `send` only errs when a topic has no subscribers yet; that's a
        // normal, non-fatal state, not a broadcast failure.
        let _ = self.sender(topic).send(bytes);
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_message() -> BridgeMessage {
        BridgeMessage {
            batch_sequence: 1,
            state_root: [7u8; 32],
            transaction_count: 3,
            witness_signatures: vec![vec![1, 2, 3]],
        }
    }

    #[test]
    fn bridge_message_round_trips_through_serialize() {
        let message = sample_message();
        let decoded = BridgeMessage::deserialize(&message.serialize()).expect("decode");
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn null_broadcaster_always_succeeds_and_never_delivers() {
        let broadcaster = NullBroadcaster::default();
        let mut receiver = broadcaster.subscribe(Topic::BridgeMsg);
        broadcaster
            .broadcast(Topic::BridgeMsg, sample_message().serialize())
            .await
            .expect("broadcast");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_broadcaster_delivers_on_the_matching_topic_only() {
        let broadcaster = ChannelBroadcaster::new(4);
        let mut bridge_rx = broadcaster.subscribe(Topic::BridgeMsg);
        let mut tx_rx = broadcaster.subscribe(Topic::Tx);

        let message = sample_message();
        broadcaster
            .broadcast(Topic::BridgeMsg, message.serialize())
            .await
            .expect("broadcast");

        let received = bridge_rx.recv().await.expect("recv");
        assert_eq!(BridgeMessage::deserialize(&received).expect("decode"), message);
        assert!(tx_rx.try_recv().is_err());
    }
}
