//! Top-level rollup orchestration: ingress admission, batch cutting,
//! MEV-aware ordering, parallel execution, proving, and witness consensus
//! (spec component C11).

pub mod broadcast;
pub mod config;
pub mod metrics;
pub mod processor;
pub mod store;

pub use broadcast::{Broadcaster, BridgeMessage, ChannelBroadcaster, NullBroadcaster, Topic};
pub use config::RollupConfig;
pub use metrics::Metrics;
pub use processor::{BatchProcessor, ProvenBatch};
pub use store::{FileKvStore, InMemoryKvStore, KvStore};
