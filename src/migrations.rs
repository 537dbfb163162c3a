//! Versioned upgrades for persisted store data.
//!
//! Migrations operate on raw JSON so that records written by older builds can
//! be repaired before they are parsed into the current types. Each step must
//! be idempotent: the same steps also run over imported and restored bundles,
//! which carry no schema version of their own.

use serde_json::Value;

use crate::models::{StoreData, StoreFile};
use crate::storage::StorageError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Task lists inside a store payload or a backup bundle.
const TASK_LIST_KEYS: [&str; 2] = ["tasks", "completedTasks"];

pub struct Migration {
    /// Schema version this migration upgrades to.
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&mut Value),
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "default missing taskType to academic",
    apply: default_task_type,
}];

fn default_task_type(data: &mut Value) {
    for key in TASK_LIST_KEYS {
        let Some(tasks) = data.get_mut(key).and_then(Value::as_array_mut) else {
            continue;
        };
        for task in tasks.iter_mut().filter_map(Value::as_object_mut) {
            let missing = task.get("taskType").map_or(true, Value::is_null);
            if missing {
                task.insert("taskType".to_string(), Value::from("academic"));
            }
        }
    }
}

/// Parses a `store.json` document, applying every migration newer than its version.
/// Files without a `schema_version` are treated as version 1.
pub fn migrate_store(mut raw: Value) -> Result<StoreFile, StorageError> {
    if !raw.is_object() {
        return Err(StorageError::Migration(
            "store file is not a JSON object".to_string(),
        ));
    }
    let version = raw
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "store schema {version} is newer than supported {CURRENT_SCHEMA_VERSION}"
        )));
    }

    let mut data = match raw.get_mut("data") {
        Some(data) => data.take(),
        None => Value::Object(Default::default()),
    };
    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        log::info!(
            "migrating store schema {} -> {}: {}",
            version,
            migration.version,
            migration.description
        );
        (migration.apply)(&mut data);
    }

    let data: StoreData = serde_json::from_value(data)?;
    Ok(StoreFile {
        schema_version: CURRENT_SCHEMA_VERSION,
        data,
    })
}

/// Brings a backup bundle up to the current record layout in place.
pub fn migrate_bundle(bundle: &mut Value) {
    for migration in MIGRATIONS {
        (migration.apply)(bundle);
    }
}
