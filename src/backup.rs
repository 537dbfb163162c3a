//! Layered backups: an auto-backup slot rewritten after every mutation,
//! periodic timestamped snapshots, user-driven export/import and the
//! recovery feed that lists, restores and deletes snapshots.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::config::BackupSettings;
use crate::events::StoreSlice;
use crate::migrations;
use crate::models::{BackupBundle, PartialBundle, SnapshotInfo};
use crate::platform::FilePicker;
use crate::scheduler::SnapshotTimer;
use crate::storage::{SnapshotGateway, StorageError, AUTO_BACKUP_NAME};
use crate::store::{LocalStore, TaskError};

/// Highest bundle major version this build can read.
const SUPPORTED_BUNDLE_MAJOR: u64 = 1;
const SNAPSHOT_PREFIX: &str = "snapshot-";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid backup: {0}")]
    Validation(String),
    #[error("unsupported backup version: {0}")]
    UnsupportedVersion(String),
    #[error("{0} is protected and cannot be deleted")]
    Protected(String),
    #[error("canceled by user")]
    Canceled,
}

impl BackupError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, BackupError::Canceled)
    }
}

impl From<TaskError> for BackupError {
    fn from(err: TaskError) -> Self {
        BackupError::Validation(err.to_string())
    }
}

struct Inner {
    store: LocalStore,
    gateway: Arc<dyn SnapshotGateway>,
    settings: BackupSettings,
    last_snapshot_at: Mutex<Option<DateTime<Utc>>>,
    /// Held from picking a snapshot name until the file is written.
    snapshot_lock: Mutex<()>,
    timer: SnapshotTimer,
    /// Runtime that auto-backup writes are handed to.
    runtime: Mutex<Option<Handle>>,
    /// Sequence handed to each auto-backup request.
    auto_requested: AtomicU64,
    /// Sequence of the newest auto-backup on disk; older requests are dropped.
    auto_written: Mutex<u64>,
}

impl Inner {
    fn write_auto_backup(&self, seq: u64, bundle: &BackupBundle) {
        let mut written = self.auto_written.lock().expect("backup state poisoned");
        if *written > seq {
            log::debug!("auto-backup seq={seq} superseded by seq={}", *written);
            return;
        }
        match self.gateway.write_snapshot(AUTO_BACKUP_NAME, bundle) {
            Ok(()) => *written = seq,
            Err(err) => log::warn!("auto-backup failed: {err}"),
        }
    }
}

#[derive(Clone)]
pub struct BackupManager {
    inner: Arc<Inner>,
}

fn snapshot_name(at: DateTime<Local>, taken: &HashSet<String>) -> String {
    let base = format!("{SNAPSHOT_PREFIX}{}", at.format("%Y%m%d-%H%M%S-%3f"));
    let mut name = format!("{base}.json");
    let mut suffix = 1;
    while taken.contains(&name) {
        name = format!("{base}-{suffix}.json");
        suffix += 1;
    }
    name
}

fn check_version(raw: &Value) -> Result<(), BackupError> {
    let Some(version) = raw.get("version") else {
        return Ok(());
    };
    let Some(text) = version.as_str() else {
        return Err(BackupError::UnsupportedVersion(version.to_string()));
    };
    let major = text
        .split('.')
        .next()
        .and_then(|part| part.trim().parse::<u64>().ok())
        .ok_or_else(|| BackupError::UnsupportedVersion(text.to_string()))?;
    if major > SUPPORTED_BUNDLE_MAJOR {
        return Err(BackupError::UnsupportedVersion(text.to_string()));
    }
    Ok(())
}

impl BackupManager {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn SnapshotGateway>,
        settings: BackupSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                settings,
                last_snapshot_at: Mutex::new(None),
                snapshot_lock: Mutex::new(()),
                timer: SnapshotTimer::new(),
                runtime: Mutex::new(None),
                auto_requested: AtomicU64::new(0),
                auto_written: Mutex::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.inner.settings
    }

    pub fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_snapshot_at
            .lock()
            .expect("backup state poisoned")
    }

    /// Hands auto-backup writes to `handle` so callers on threads without a
    /// runtime context (sync commands run on the main thread) never block.
    pub fn attach_runtime(&self, handle: Handle) {
        *self.inner.runtime.lock().expect("backup state poisoned") = Some(handle);
    }

    fn writer_runtime(&self) -> Option<Handle> {
        let attached = self
            .inner
            .runtime
            .lock()
            .expect("backup state poisoned")
            .clone();
        attached.or_else(|| Handle::try_current().ok())
    }

    /// Rewrites the auto-backup slot with the current store contents.
    ///
    /// The bundle is captured before returning and the write runs on the
    /// blocking pool of the attached runtime. Without any runtime (headless use)
    /// it is written inline. Failures are logged.
    pub fn save_auto_backup(&self) {
        if !self.inner.settings.auto_backup_enabled {
            return;
        }
        let bundle = self.inner.store.get_all_data();
        let seq = self.inner.auto_requested.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        let write = move || inner.write_auto_backup(seq, &bundle);
        match self.writer_runtime() {
            Some(handle) => {
                handle.spawn_blocking(write);
            }
            None => write(),
        }
    }

    /// Writes a new timestamped snapshot and applies retention. Returns its name.
    pub fn save_snapshot(&self) -> Result<String, BackupError> {
        let _guard = self.inner.snapshot_lock.lock().expect("backup state poisoned");
        let bundle = self.inner.store.get_all_data();
        let taken: HashSet<String> = self
            .inner
            .gateway
            .list_snapshots()?
            .into_iter()
            .map(|info| info.name)
            .collect();
        let name = snapshot_name(Local::now(), &taken);
        self.inner.gateway.write_snapshot(&name, &bundle)?;
        *self
            .inner
            .last_snapshot_at
            .lock()
            .expect("backup state poisoned") = Some(bundle.timestamp);
        log::info!("snapshot saved name={name}");

        if let Some(keep) = self.inner.settings.snapshot_keep {
            match self.prune_snapshots(keep) {
                Ok(0) => {}
                Ok(removed) => log::info!("pruned {removed} old snapshot(s) keep={keep}"),
                Err(err) => log::warn!("snapshot pruning failed: {err}"),
            }
        }
        Ok(name)
    }

    fn prune_snapshots(&self, keep: usize) -> Result<usize, StorageError> {
        let mut snapshots: Vec<SnapshotInfo> = self
            .inner
            .gateway
            .list_snapshots()?
            .into_iter()
            .filter(|info| !info.is_auto && info.name.starts_with(SNAPSHOT_PREFIX))
            .collect();
        if snapshots.len() <= keep {
            return Ok(0);
        }
        snapshots.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        let excess = snapshots.len() - keep;
        for info in &snapshots[..excess] {
            self.inner.gateway.delete_snapshot(&info.name)?;
        }
        Ok(excess)
    }

    /// Starts the periodic snapshot job, replacing any running one. The first
    /// snapshot is taken right away. Must be called from within a tokio runtime.
    pub fn start_snapshot_timer(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .timer
            .start(self.inner.settings.snapshot_interval, move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return false;
                    };
                    let manager = BackupManager { inner };
                    match tokio::task::spawn_blocking(move || manager.save_snapshot()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => log::warn!("periodic snapshot failed: {err}"),
                        Err(err) => log::warn!("periodic snapshot task failed: {err}"),
                    }
                    true
                }
            });
    }

    pub fn stop_snapshot_timer(&self) -> bool {
        self.inner.timer.stop()
    }

    pub fn is_snapshot_timer_running(&self) -> bool {
        self.inner.timer.is_running()
    }

    /// Asks the user for a destination and writes the full store there.
    pub fn export_backup(&self, picker: &dyn FilePicker) -> Result<PathBuf, BackupError> {
        let default_name = format!(
            "focusdesk-backup-{}.json",
            Local::now().format("%Y%m%d-%H%M%S")
        );
        let path = picker
            .save_file_dialog(&default_name)
            .ok_or(BackupError::Canceled)?;
        let bundle = self.inner.store.get_all_data();
        self.inner.gateway.export_to(&path, &bundle)?;
        log::info!("backup exported path={}", path.display());
        Ok(path)
    }

    /// Asks the user for a backup file and restores it.
    pub fn import_backup(&self, picker: &dyn FilePicker) -> Result<Vec<StoreSlice>, BackupError> {
        let path = picker
            .open_file_dialog()
            .and_then(|paths| paths.into_iter().next())
            .ok_or(BackupError::Canceled)?;
        let raw = self.inner.gateway.import_from(&path)?;
        let changed = self.try_restore(raw)?;
        log::info!("backup imported path={}", path.display());
        Ok(changed)
    }

    /// Snapshots in the managed directory, newest first.
    pub fn list_backups(&self) -> Result<Vec<SnapshotInfo>, BackupError> {
        let mut list = self.inner.gateway.list_snapshots()?;
        list.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(list)
    }

    pub fn load_backup(&self, name: &str) -> Result<Value, BackupError> {
        Ok(self.inner.gateway.read_snapshot(name)?)
    }

    pub fn delete_backup(&self, name: &str) -> Result<(), BackupError> {
        if name == AUTO_BACKUP_NAME {
            return Err(BackupError::Protected(name.to_string()));
        }
        self.inner.gateway.delete_snapshot(name)?;
        log::info!("snapshot deleted name={name}");
        Ok(())
    }

    pub fn restore_backup(&self, name: &str) -> Result<Vec<StoreSlice>, BackupError> {
        let raw = self.inner.gateway.read_snapshot(name)?;
        let changed = self.try_restore(raw)?;
        log::info!("snapshot restored name={name}");
        Ok(changed)
    }

    /// Applies a bundle to the store. Returns `false`, leaving the store
    /// untouched, when the bundle is rejected.
    pub fn restore_all_data(&self, bundle: &Value) -> bool {
        match self.try_restore(bundle.clone()) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("restore rejected: {err}");
                false
            }
        }
    }

    /// Validates, migrates and applies a raw bundle in one step.
    pub fn try_restore(&self, mut raw: Value) -> Result<Vec<StoreSlice>, BackupError> {
        if !raw.is_object() {
            return Err(BackupError::Validation(
                "backup is not a JSON object".to_string(),
            ));
        }
        check_version(&raw)?;
        migrations::migrate_bundle(&mut raw);
        let bundle: PartialBundle = serde_json::from_value(raw)
            .map_err(|err| BackupError::Validation(err.to_string()))?;
        Ok(self.inner.store.restore(bundle)?)
    }
}
