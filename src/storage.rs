use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::AppConfig;
use crate::migrations;
use crate::models::{BackupBundle, SnapshotInfo, StoreFile};

const STORE_FILE: &str = "store.json";
const CONFIG_FILE: &str = "config.json";
pub const BACKUP_DIR: &str = "backups";
pub const AUTO_BACKUP_NAME: &str = "auto-backup.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a backup bundle: {0}")]
    NotABundle(String),
    #[error("invalid snapshot name: {0}")]
    InvalidName(String),
    #[error("migration error: {0}")]
    Migration(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Durable storage for snapshot bundles.
///
/// `name`-based calls address the managed backup location; `export_to` and
/// `import_from` address arbitrary user-chosen paths.
pub trait SnapshotGateway: Send + Sync {
    fn write_snapshot(&self, name: &str, bundle: &BackupBundle) -> Result<(), StorageError>;
    fn read_snapshot(&self, name: &str) -> Result<Value, StorageError>;
    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StorageError>;
    fn delete_snapshot(&self, name: &str) -> Result<(), StorageError>;
    fn export_to(&self, path: &Path, bundle: &BackupBundle) -> Result<(), StorageError>;
    fn import_from(&self, path: &Path) -> Result<Value, StorageError>;
}

/// Snapshot names are bare `*.json` file names; anything that could walk out of
/// the backup directory is rejected.
pub fn validate_snapshot_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.ends_with(".json")
        && !name.contains(|c: char| c == '/' || c == '\\')
        && !name.contains("..")
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

fn parse_bundle(bytes: &[u8]) -> Result<Value, StorageError> {
    let value: Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(StorageError::NotABundle(
            "top-level value is not an object".to_string(),
        ));
    }
    Ok(value)
}

fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(data)?;
    write_atomic_bytes(path, &json)
}

/// Writes through a uniquely named temp file in the target directory, so
/// neighbouring files in a user-picked folder are never touched.
fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// App data directory layout: `store.json`, `config.json` and `backups/`.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }

    /// Loads the local store, upgrading older layouts on the way in.
    pub fn load_store(&self) -> Result<StoreFile, StorageError> {
        let raw: Value = self.load_json(self.root.join(STORE_FILE))?;
        migrations::migrate_store(raw)
    }

    pub fn save_store(&self, data: &StoreFile) -> Result<(), StorageError> {
        write_atomic(&self.root.join(STORE_FILE), data)
    }

    /// Missing config means defaults.
    pub fn load_config(&self) -> Result<AppConfig, StorageError> {
        match self.load_json(self.root.join(CONFIG_FILE)) {
            Ok(config) => Ok(config),
            Err(err) if err.is_not_found() => Ok(AppConfig::default()),
            Err(err) => Err(err),
        }
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<(), StorageError> {
        write_atomic(&self.root.join(CONFIG_FILE), config)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let buf = read_file(&path)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

/// Native gateway over a backup directory.
pub struct FsGateway {
    dir: PathBuf,
}

impl FsGateway {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_snapshot_name(name)?;
        Ok(self.dir.join(name))
    }
}

impl SnapshotGateway for FsGateway {
    fn write_snapshot(&self, name: &str, bundle: &BackupBundle) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        write_atomic(&path, bundle)
    }

    fn read_snapshot(&self, name: &str) -> Result<Value, StorageError> {
        let path = self.path_for(name)?;
        parse_bundle(&read_file(&path)?)
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StorageError> {
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_snapshot_name(&name).is_err() {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            results.push(SnapshotInfo {
                is_auto: name == AUTO_BACKUP_NAME,
                name,
                size: metadata.len(),
                modified_at,
            });
        }
        results.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(results)
    }

    fn delete_snapshot(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        fs::remove_file(path)?;
        Ok(())
    }

    fn export_to(&self, path: &Path, bundle: &BackupBundle) -> Result<(), StorageError> {
        write_atomic(path, bundle)
    }

    fn import_from(&self, path: &Path) -> Result<Value, StorageError> {
        parse_bundle(&read_file(path)?)
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
}

/// In-process gateway with the same contract as [`FsGateway`]. Used when no
/// writable data directory is available and by tests.
#[derive(Default)]
pub struct MemoryGateway {
    snapshots: Mutex<BTreeMap<String, MemoryEntry>>,
    external: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{what} not found"),
        ))
    }
}

impl SnapshotGateway for MemoryGateway {
    fn write_snapshot(&self, name: &str, bundle: &BackupBundle) -> Result<(), StorageError> {
        validate_snapshot_name(name)?;
        let bytes = serde_json::to_vec_pretty(bundle)?;
        let mut guard = self.snapshots.lock().expect("gateway poisoned");
        guard.insert(
            name.to_string(),
            MemoryEntry {
                bytes,
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn read_snapshot(&self, name: &str) -> Result<Value, StorageError> {
        validate_snapshot_name(name)?;
        let guard = self.snapshots.lock().expect("gateway poisoned");
        let entry = guard.get(name).ok_or_else(|| Self::not_found(name))?;
        parse_bundle(&entry.bytes)
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StorageError> {
        let guard = self.snapshots.lock().expect("gateway poisoned");
        let mut results: Vec<SnapshotInfo> = guard
            .iter()
            .map(|(name, entry)| SnapshotInfo {
                name: name.clone(),
                size: entry.bytes.len() as u64,
                modified_at: entry.modified_at,
                is_auto: name == AUTO_BACKUP_NAME,
            })
            .collect();
        results.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(results)
    }

    fn delete_snapshot(&self, name: &str) -> Result<(), StorageError> {
        validate_snapshot_name(name)?;
        let mut guard = self.snapshots.lock().expect("gateway poisoned");
        guard
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }

    fn export_to(&self, path: &Path, bundle: &BackupBundle) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(bundle)?;
        let mut guard = self.external.lock().expect("gateway poisoned");
        guard.insert(path.to_path_buf(), bytes);
        Ok(())
    }

    fn import_from(&self, path: &Path) -> Result<Value, StorageError> {
        let guard = self.external.lock().expect("gateway poisoned");
        let bytes = guard
            .get(path)
            .ok_or_else(|| Self::not_found(&path.display().to_string()))?;
        parse_bundle(bytes)
    }
}
