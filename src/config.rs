use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest snapshot period accepted from `config.json`.
const MIN_SNAPSHOT_INTERVAL_SECS: u64 = 10;

/// Contents of `config.json` in the app data directory. Every field is optional on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Retention for timestamped snapshots; `None` keeps all of them.
    #[serde(default)]
    pub snapshot_keep: Option<usize>,
    #[serde(default = "default_auto_backup_enabled")]
    pub auto_backup_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval_secs(),
            snapshot_keep: None,
            auto_backup_enabled: default_auto_backup_enabled(),
        }
    }
}

impl AppConfig {
    pub fn backup_settings(&self) -> BackupSettings {
        BackupSettings {
            snapshot_interval: Duration::from_secs(
                self.snapshot_interval_secs.max(MIN_SNAPSHOT_INTERVAL_SECS),
            ),
            snapshot_keep: self.snapshot_keep.filter(|keep| *keep > 0),
            auto_backup_enabled: self.auto_backup_enabled,
        }
    }
}

fn default_snapshot_interval_secs() -> u64 {
    5 * 60
}

fn default_auto_backup_enabled() -> bool {
    true
}

/// Runtime knobs for the backup manager.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSettings {
    pub snapshot_interval: Duration,
    pub snapshot_keep: Option<usize>,
    pub auto_backup_enabled: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        AppConfig::default().backup_settings()
    }
}
