use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const BUNDLE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
}

impl TaskStatus {
    /// Forward cycle used by the status toggle.
    pub fn next(self) -> Self {
        match self {
            TaskStatus::NotStarted => TaskStatus::InProgress,
            TaskStatus::InProgress => TaskStatus::Complete,
            TaskStatus::Complete => TaskStatus::NotStarted,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Academic,
    Personal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, with = "civil_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, with = "clock_time")]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub custom_priority: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Appends paths that are not already attached, keeping insertion order.
    /// Returns how many were added.
    pub fn attach(&mut self, paths: impl IntoIterator<Item = String>) -> usize {
        let mut added = 0;
        for path in paths {
            if path.trim().is_empty() || self.attachments.contains(&path) {
                continue;
            }
            self.attachments.push(path);
            added += 1;
        }
        added
    }
}

/// Completed tasks keep the full task shape; they live in a separate history list.
pub type CompletedTask = Task;

/// User input for a new task. Server-owned fields (id, timestamps, priority) are filled on create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, with = "civil_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, with = "clock_time")]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Everything the running app keeps in its local store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Newest first.
    #[serde(default)]
    pub completed_tasks: Vec<CompletedTask>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub semester_start_date: String,
    #[serde(default)]
    pub semester_end_date: String,
    #[serde(default)]
    pub task_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StoreFile {
    pub schema_version: u32,
    pub data: StoreData,
}

/// Full point-in-time copy of the local store, as written to backup files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub tasks: Vec<Task>,
    pub completed_tasks: Vec<CompletedTask>,
    pub user_name: String,
    pub semester_start_date: String,
    pub semester_end_date: String,
    pub task_filter: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Shape accepted on restore: every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialBundle {
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
    #[serde(default)]
    pub completed_tasks: Option<Vec<CompletedTask>>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub semester_start_date: Option<String>,
    #[serde(default)]
    pub semester_end_date: Option<String>,
    #[serde(default)]
    pub task_filter: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub is_auto: bool,
}

/// Accepts `YYYY-MM-DD`; an empty string reads as no date.
mod civil_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => s.serialize_str(&date.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => NaiveDate::parse_from_str(text, FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`; always written as `HH:MM`.
mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => s.serialize_str(&time.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => NaiveTime::parse_from_str(text, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
