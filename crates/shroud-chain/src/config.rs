//! Storage engine configuration.
//!
//! [`ChainConfig`] carries the data directory and the policy switches of the
//! storage engine. It can be built programmatically or loaded from a TOML or
//! JSON file, with `SHROUD_*` environment variables taking precedence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shroud_core::constants::MAX_INVALID_BLOCKS;
use shroud_core::error::ShroudError;

/// Configuration for a [`Blockchain`](crate::blockchain::Blockchain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Root directory for persisted state.
    pub data_dir: PathBuf,
    /// File name of the persisted state inside `data_dir`.
    pub state_file: String,
    /// Drop signatures of old prunable blocks when loading.
    pub pruning_enabled: bool,
    /// Forget the old main chain after a switch instead of keeping it as an
    /// alternative branch.
    pub discard_disconnected_chain: bool,
    /// Capacity of the invalid-block cache.
    pub max_invalid_blocks: usize,
    /// Alternative blocks more than this many blocks below the tip are dropped.
    pub alt_chain_retention: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shroud");

        Self {
            data_dir,
            state_file: "blockchain.bin".to_string(),
            pruning_enabled: false,
            discard_disconnected_chain: false,
            max_invalid_blocks: MAX_INVALID_BLOCKS,
            alt_chain_retention: 2_000,
        }
    }
}

impl ChainConfig {
    /// Config rooted at `data_dir` with every other field defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a config file, overlaid with `SHROUD_*` environment variables.
    pub fn load(path: &Path) -> Result<Self, ShroudError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SHROUD"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ShroudError::Config(e.to_string()))
    }

    /// Path of the persisted state file.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(&self.state_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_data_dir_ends_with_shroud() {
        let cfg = ChainConfig::default();
        assert!(
            cfg.data_dir.ends_with("shroud"),
            "data_dir should end with 'shroud': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn defaults_are_conservative() {
        let cfg = ChainConfig::default();
        assert!(!cfg.pruning_enabled);
        assert!(!cfg.discard_disconnected_chain);
        assert_eq!(cfg.max_invalid_blocks, MAX_INVALID_BLOCKS);
    }

    #[test]
    fn state_path_appends_file_name() {
        let cfg = ChainConfig::with_data_dir("/tmp/shroud-test");
        assert_eq!(cfg.state_path(), PathBuf::from("/tmp/shroud-test/blockchain.bin"));
    }

    #[test]
    fn load_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/shroud\"\npruning_enabled = true\n",
        )
        .unwrap();

        let cfg = ChainConfig::load(&path).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/shroud"));
        assert!(cfg.pruning_enabled);
        assert_eq!(cfg.state_file, "blockchain.bin");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = ChainConfig::load(Path::new("/nonexistent/shroud.toml")).unwrap_err();
        assert!(matches!(err, ShroudError::Config(_)));
    }
}
