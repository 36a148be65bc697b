use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use quids_rollup::RollupConfig;

/// On-disk shape of the node's TOML configuration file. Every field is
/// optional; anything left out falls back to [`RollupConfig::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub max_batch_size: Option<usize>,
    pub min_batch_size: Option<usize>,
    pub max_wait_time_ms: Option<u64>,
    pub ingress_capacity: Option<usize>,
    pub witness_count: Option<usize>,
    pub consensus_threshold: Option<f64>,
    /// Directory a file-backed store persists batch headers and account
    /// state to. Unset means the node runs with no durable storage.
    pub data_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn into_rollup_config(self) -> RollupConfig {
        let mut config = RollupConfig::default();
        if let Some(v) = self.max_batch_size {
            config.max_batch_size = v;
        }
        if let Some(v) = self.min_batch_size {
            config.min_batch_size = v;
        }
        if let Some(v) = self.max_wait_time_ms {
            config.max_wait_time = Duration::from_millis(v);
        }
        if let Some(v) = self.ingress_capacity {
            config.ingress_capacity = v;
        }
        if let Some(v) = self.witness_count {
            config.consensus.witness_count = v;
        }
        if let Some(v) = self.consensus_threshold {
            config.consensus.consensus_threshold = v;
        }
        if let Some(v) = self.data_dir {
            config.data_dir = Some(v);
        }
        config
    }
}

/// Loads the effective `RollupConfig`: the file at `path` if given, else
/// `RollupConfig::default()`.
pub fn load_rollup_config(path: Option<&Path>) -> Result<RollupConfig> {
    match path {
        Some(path) => Ok(FileConfig::load(path)?.into_rollup_config()),
        None => Ok(RollupConfig::default()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unset_fields_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "max_batch_size = 42").expect("write");
        let config = load_rollup_config(Some(file.path())).expect("load");
        assert_eq!(config.max_batch_size, 42);
        assert_eq!(config.min_batch_size, RollupConfig::default().min_batch_size);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "not_a_real_field = 1").expect("write");
        assert!(FileConfig::load(file.path()).is_err());
    }
}
