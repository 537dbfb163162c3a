use serde::Serialize;
use serde_json::Value;

use crate::models::StoreData;

pub const EVENT_STORE_UPDATED: &str = "store_updated";

/// Independently observable parts of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSlice {
    Tasks,
    CompletedTasks,
    UserName,
    Semester,
    TaskFilter,
}

impl StoreSlice {
    pub const ALL: [StoreSlice; 5] = [
        StoreSlice::Tasks,
        StoreSlice::CompletedTasks,
        StoreSlice::UserName,
        StoreSlice::Semester,
        StoreSlice::TaskFilter,
    ];

    /// Current value of this slice, in the same JSON shape the backup bundle uses.
    pub fn value_of(self, data: &StoreData) -> Value {
        let value = match self {
            StoreSlice::Tasks => serde_json::to_value(&data.tasks),
            StoreSlice::CompletedTasks => serde_json::to_value(&data.completed_tasks),
            StoreSlice::UserName => Ok(Value::from(data.user_name.clone())),
            StoreSlice::Semester => Ok(serde_json::json!({
                "semesterStartDate": data.semester_start_date,
                "semesterEndDate": data.semester_end_date,
            })),
            StoreSlice::TaskFilter => Ok(Value::from(data.task_filter.clone())),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Payload delivered to store subscribers and forwarded to the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct SliceUpdate {
    pub slice: StoreSlice,
    pub value: Value,
}
