use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::BackupManager;
use crate::config::AppConfig;
use crate::models::StoreData;
use crate::storage::{
    FsGateway, MemoryGateway, SnapshotGateway, Storage, StorageError, AUTO_BACKUP_NAME,
};
use crate::store::LocalStore;

/// Services shared by every command, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: LocalStore,
    pub backups: BackupManager,
    storage: Arc<Storage>,
}

impl AppState {
    /// Opens the app data directory at `root`.
    ///
    /// Snapshots fall back to memory when the backup directory cannot be created.
    pub fn open(root: PathBuf) -> Self {
        let storage = Storage::new(root);
        let gateway: Arc<dyn SnapshotGateway> = match storage.ensure_dirs() {
            Ok(()) => Arc::new(FsGateway::new(storage.backups_dir())),
            Err(err) => {
                log::error!(
                    "backup directory unavailable dir={} err={err}; keeping snapshots in memory",
                    storage.backups_dir().display()
                );
                Arc::new(MemoryGateway::new())
            }
        };
        Self::with_gateway(storage, gateway)
    }

    pub fn with_gateway(storage: Storage, gateway: Arc<dyn SnapshotGateway>) -> Self {
        let config = storage.load_config().unwrap_or_else(|err| {
            log::warn!("config.json unreadable, using defaults: {err}");
            AppConfig::default()
        });

        let (data, recover) = match storage.load_store() {
            Ok(file) => (file.data, false),
            Err(err) if err.is_not_found() => {
                log::info!("no store found under {}; starting empty", storage.root().display());
                (StoreData::default(), false)
            }
            Err(err) => {
                log::error!("store.json unreadable: {err}");
                (StoreData::default(), true)
            }
        };

        let store = LocalStore::new(data);
        let backups = BackupManager::new(store.clone(), gateway, config.backup_settings());
        if recover {
            match backups.restore_backup(AUTO_BACKUP_NAME) {
                Ok(_) => log::warn!("store recovered from {AUTO_BACKUP_NAME}"),
                Err(err) => log::warn!("auto-backup unavailable, starting empty: {err}"),
            }
        }

        Self {
            store,
            backups,
            storage: Arc::new(storage),
        }
    }

    /// Writes the store to disk, then refreshes the auto-backup slot. The
    /// auto-backup runs even when the store write fails.
    pub fn persist(&self) -> Result<(), StorageError> {
        let result = self.storage.save_store(&self.store.store_file());
        if let Err(err) = &result {
            log::error!("failed to save store: {err}");
        }
        self.backups.save_auto_backup();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskDraft;
    use chrono::Local;
    use std::fs;

    fn add_task(state: &AppState, title: &str) {
        let draft = TaskDraft {
            title: title.to_string(),
            ..TaskDraft::default()
        };
        state.store.create_task(draft, Local::now()).unwrap();
    }

    #[test]
    fn open_empty_directory_starts_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf());
        assert_eq!(state.store.data(), StoreData::default());
        assert!(dir.path().join("backups").is_dir());
    }

    #[test]
    fn persist_writes_store_and_auto_backup() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf());
        add_task(&state, "persisted");
        state.store.set_user_name("Lee").unwrap();
        state.persist().unwrap();

        assert!(dir.path().join("store.json").is_file());
        assert!(dir.path().join("backups").join(AUTO_BACKUP_NAME).is_file());

        let reopened = AppState::open(dir.path().to_path_buf());
        assert_eq!(reopened.store.data(), state.store.data());
    }

    #[test]
    fn corrupt_store_recovers_from_auto_backup() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf());
        add_task(&state, "survivor");
        state.persist().unwrap();
        fs::write(dir.path().join("store.json"), b"{ truncated").unwrap();

        let reopened = AppState::open(dir.path().to_path_buf());
        let tasks = reopened.store.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "survivor");
    }

    #[test]
    fn corrupt_store_without_auto_backup_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("store.json"), b"[]").unwrap();
        let state = AppState::open(dir.path().to_path_buf());
        assert_eq!(state.store.data(), StoreData::default());
    }

    #[test]
    fn config_controls_backup_settings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            br#"{ "snapshot_interval_secs": 60, "snapshot_keep": 5 }"#,
        )
        .unwrap();
        let state = AppState::open(dir.path().to_path_buf());
        let settings = state.backups.settings();
        assert_eq!(settings.snapshot_interval.as_secs(), 60);
        assert_eq!(settings.snapshot_keep, Some(5));
    }

    #[test]
    fn unusable_data_directory_falls_back_to_memory_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("occupied");
        fs::write(&not_a_dir, b"x").unwrap();

        let state = AppState::open(not_a_dir);
        add_task(&state, "in memory");
        assert!(state.persist().is_err());
        assert_eq!(state.store.tasks().len(), 1);

        let name = state.backups.save_snapshot().unwrap();
        let listed = state.backups.list_backups().unwrap();
        assert!(listed.iter().any(|s| s.name == name));
        assert!(listed.iter().any(|s| s.is_auto));
    }
}
