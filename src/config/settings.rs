use std::path::PathBuf;

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

use crate::versioned_file::DEFAULT_VERSION_COUNT;

/// Runtime settings of a [`Broker`](crate::Broker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Keep topic add/remove and subscription changes out of the undo history.
    pub skip_core_undo: bool,
    /// Maximum undo entries; `0` keeps everything.
    pub undo_limit: usize,
    /// Snapshot backups kept by `save`.
    pub version_count: usize,
    /// Default snapshot location.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            skip_core_undo: false,
            undo_limit: 0,
            version_count: DEFAULT_VERSION_COUNT,
            snapshot_path: None,
        }
    }
}

impl BrokerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Defaults
            .set_default("skip_core_undo", false)?
            .set_default("undo_limit", 0)?
            .set_default("version_count", DEFAULT_VERSION_COUNT as u64)?
            // Environment variables with the TREEBUS_ prefix
            .add_source(Environment::with_prefix("TREEBUS").try_parsing(true))
            .build()?;

        cfg.try_deserialize()
    }
}
