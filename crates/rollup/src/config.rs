use std::path::PathBuf;
use std::time::Duration;

use quids_consensus::BatchConfig;
use quids_executor::ExecutorConfig;
use quids_zk::EngineConfig;

/// Batch-cutting and ingress policy for a [`crate::BatchProcessor`] (spec
/// component C11 / §4.11).
#[derive(Clone, Debug)]
pub struct RollupConfig {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub max_wait_time: Duration,
    /// Capacity of the ingress queue. Admission is refused once the queue
    /// is over 80% full (spec §4.11's overload signal).
    pub ingress_capacity: usize,
    pub executor: ExecutorConfig,
    pub consensus: BatchConfig,
    pub zk: EngineConfig,
    /// Directory backing a [`crate::FileKvStore`]. `None` runs against an
    /// in-memory store that doesn't survive the process — fine for a single
    /// `serve` session, but invisible to a later `exit` invocation.
    pub data_dir: Option<PathBuf>,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            min_batch_size: 1,
            max_wait_time: Duration::from_secs(1),
            ingress_capacity: 10_000,
            executor: ExecutorConfig::default(),
            consensus: BatchConfig::default(),
            zk: EngineConfig::default(),
            data_dir: None,
        }
    }
}

impl RollupConfig {
    pub fn overload_threshold(&self) -> usize {
        (self.ingress_capacity * 4) / 5
    }
}
