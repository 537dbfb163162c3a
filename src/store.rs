//! The local store: single in-memory source of truth for live application
//! state, with per-slice change subscriptions.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::events::{SliceUpdate, StoreSlice};
use crate::migrations::CURRENT_SCHEMA_VERSION;
use crate::models::{
    BackupBundle, PartialBundle, StoreData, StoreFile, Task, TaskDraft, TaskStatus,
    BUNDLE_VERSION,
};
use crate::priority;

#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    #[error("task title cannot be empty")]
    EmptyTitle,
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("duplicate task id: {0}")]
    DuplicateId(String),
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("semester end date is before its start date")]
    SemesterOrder,
}

pub type Listener = Arc<dyn Fn(&SliceUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    slices: Vec<StoreSlice>,
    listener: Listener,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscription>,
}

#[derive(Clone, Default)]
pub struct LocalStore {
    inner: Arc<Mutex<StoreData>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn parse_civil_date(value: &str) -> Result<Option<NaiveDate>, TaskError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| TaskError::InvalidDate(value.to_string()))
}

fn check_semester(start: &str, end: &str) -> Result<(), TaskError> {
    if let (Some(start), Some(end)) = (parse_civil_date(start)?, parse_civil_date(end)?) {
        if end < start {
            return Err(TaskError::SemesterOrder);
        }
    }
    Ok(())
}

fn check_tasks(tasks: &[Task]) -> Result<(), TaskError> {
    let mut seen = std::collections::HashSet::new();
    for task in tasks {
        if task.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        if !seen.insert(task.id.as_str()) {
            return Err(TaskError::DuplicateId(task.id.clone()));
        }
    }
    Ok(())
}

fn resort(data: &mut StoreData, now: DateTime<Local>) {
    let tasks = std::mem::take(&mut data.tasks);
    data.tasks = priority::display_order(tasks, now.naive_local());
}

fn index_of(data: &StoreData, task_id: &str) -> Result<usize, TaskError> {
    data.tasks
        .iter()
        .position(|task| task.id == task_id)
        .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
}

/// Sets a status on the active task at `index`. Reaching `Complete` moves the
/// task to the front of the history. Returns the task as stored afterwards.
fn apply_status(
    data: &mut StoreData,
    index: usize,
    status: TaskStatus,
    now: DateTime<Local>,
) -> (Task, Vec<StoreSlice>) {
    if status == TaskStatus::Complete {
        let mut task = data.tasks.remove(index);
        task.status = TaskStatus::Complete;
        task.completed_at = Some(now.with_timezone(&Utc));
        data.completed_tasks.insert(0, task.clone());
        return (task, vec![StoreSlice::Tasks, StoreSlice::CompletedTasks]);
    }
    let task = &mut data.tasks[index];
    task.status = status;
    task.completed_at = None;
    (task.clone(), vec![StoreSlice::Tasks])
}

impl LocalStore {
    pub fn new(data: StoreData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(data)),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub fn data(&self) -> StoreData {
        let guard = self.inner.lock().expect("store poisoned");
        guard.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let guard = self.inner.lock().expect("store poisoned");
        guard.tasks.clone()
    }

    pub fn completed_tasks(&self) -> Vec<Task> {
        let guard = self.inner.lock().expect("store poisoned");
        guard.completed_tasks.clone()
    }

    pub fn store_file(&self) -> StoreFile {
        StoreFile {
            schema_version: CURRENT_SCHEMA_VERSION,
            data: self.data(),
        }
    }

    /// Captures the whole store as a backup bundle.
    pub fn get_all_data(&self) -> BackupBundle {
        let data = self.data();
        BackupBundle {
            tasks: data.tasks,
            completed_tasks: data.completed_tasks,
            user_name: data.user_name,
            semester_start_date: data.semester_start_date,
            semester_end_date: data.semester_end_date,
            task_filter: data.task_filter,
            timestamp: Utc::now(),
            version: BUNDLE_VERSION.to_string(),
        }
    }

    pub fn subscribe(&self, slices: &[StoreSlice], listener: Listener) -> SubscriptionId {
        let mut guard = self.subscribers.lock().expect("subscribers poisoned");
        guard.next_id += 1;
        let id = SubscriptionId(guard.next_id);
        guard.entries.push(Subscription {
            id,
            slices: slices.to_vec(),
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscribers.lock().expect("subscribers poisoned");
        let before = guard.entries.len();
        guard.entries.retain(|entry| entry.id != id);
        guard.entries.len() != before
    }

    /// Listeners run after both locks are released so they may read the store.
    fn notify(&self, data: &StoreData, changed: &[StoreSlice]) {
        let listeners: Vec<(Vec<StoreSlice>, Listener)> = {
            let guard = self.subscribers.lock().expect("subscribers poisoned");
            guard
                .entries
                .iter()
                .map(|entry| (entry.slices.clone(), entry.listener.clone()))
                .collect()
        };
        for slice in changed {
            let interested: Vec<&Listener> = listeners
                .iter()
                .filter(|(slices, _)| slices.contains(slice))
                .map(|(_, listener)| listener)
                .collect();
            if interested.is_empty() {
                continue;
            }
            let update = SliceUpdate {
                slice: *slice,
                value: slice.value_of(data),
            };
            for listener in interested {
                listener(&update);
            }
        }
    }

    /// Runs `apply` under the lock; on success, notifies subscribers of the slices it reports.
    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut StoreData) -> Result<(R, Vec<StoreSlice>), TaskError>,
    ) -> Result<R, TaskError> {
        let (result, changed, snapshot) = {
            let mut guard = self.inner.lock().expect("store poisoned");
            let (result, changed) = apply(&mut *guard)?;
            let snapshot = (!changed.is_empty()).then(|| guard.clone());
            (result, changed, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.notify(&snapshot, &changed);
        }
        Ok(result)
    }

    pub fn create_task(&self, draft: TaskDraft, now: DateTime<Local>) -> Result<Task, TaskError> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        let mut task = Task {
            id: Uuid::new_v4().to_string(),
            title,
            description: non_empty(draft.description),
            url: non_empty(draft.url),
            due_date: draft.due_date,
            time: draft.time.filter(|_| draft.due_date.is_some()),
            status: TaskStatus::NotStarted,
            task_type: draft.task_type,
            attachments: Vec::new(),
            custom_priority: 0,
            created_at: now.with_timezone(&Utc),
            completed_at: None,
        };
        task.attach(draft.attachments);

        self.mutate(|data| {
            data.tasks.push(task.clone());
            resort(data, now);
            Ok((task, vec![StoreSlice::Tasks]))
        })
    }

    /// Replaces the editable fields of an active task. `id`, `createdAt` and the
    /// manual priority are kept from the stored copy.
    pub fn update_task(&self, task: Task, now: DateTime<Local>) -> Result<Task, TaskError> {
        let title = task.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        self.mutate(|data| {
            let index = index_of(data, &task.id)?;
            let existing = &mut data.tasks[index];
            existing.title = title;
            existing.description = non_empty(task.description);
            existing.url = non_empty(task.url);
            existing.due_date = task.due_date;
            existing.time = task.time.filter(|_| task.due_date.is_some());
            existing.task_type = task.task_type;
            existing.attachments.clear();
            existing.attach(task.attachments);

            let (updated, changed) = apply_status(data, index, task.status, now);
            resort(data, now);
            Ok((updated, changed))
        })
    }

    /// Advances the status one step: not-started -> in-progress -> complete.
    pub fn cycle_status(&self, task_id: &str, now: DateTime<Local>) -> Result<Task, TaskError> {
        self.mutate(|data| {
            let index = index_of(data, task_id)?;
            let next = data.tasks[index].status.next();
            let (updated, changed) = apply_status(data, index, next, now);
            resort(data, now);
            Ok((updated, changed))
        })
    }

    pub fn delete_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.mutate(|data| {
            let index = index_of(data, task_id)?;
            let removed = data.tasks.remove(index);
            Ok((removed, vec![StoreSlice::Tasks]))
        })
    }

    pub fn add_attachments(&self, task_id: &str, paths: Vec<String>) -> Result<Task, TaskError> {
        self.mutate(|data| {
            let index = index_of(data, task_id)?;
            let task = &mut data.tasks[index];
            let added = task.attach(paths);
            let changed = if added > 0 {
                vec![StoreSlice::Tasks]
            } else {
                Vec::new()
            };
            Ok((task.clone(), changed))
        })
    }

    pub fn remove_attachment(&self, task_id: &str, path: &str) -> Result<Task, TaskError> {
        self.mutate(|data| {
            let index = index_of(data, task_id)?;
            let task = &mut data.tasks[index];
            let before = task.attachments.len();
            task.attachments.retain(|existing| existing != path);
            let changed = if task.attachments.len() != before {
                vec![StoreSlice::Tasks]
            } else {
                Vec::new()
            };
            Ok((task.clone(), changed))
        })
    }

    pub fn smart_sort(&self, now: DateTime<Local>) -> Vec<Task> {
        let result = self.mutate(|data| {
            let tasks = std::mem::take(&mut data.tasks);
            data.tasks = priority::smart_sort(tasks, now.naive_local());
            Ok((data.tasks.clone(), vec![StoreSlice::Tasks]))
        });
        result.unwrap_or_default()
    }

    /// Drag-and-drop: moves `moved_id` onto `target_id` in the rendered order.
    pub fn reorder(
        &self,
        moved_id: &str,
        target_id: &str,
        now: DateTime<Local>,
    ) -> Result<Vec<Task>, TaskError> {
        self.mutate(|data| {
            index_of(data, moved_id)?;
            index_of(data, target_id)?;
            let tasks = std::mem::take(&mut data.tasks);
            let rendered = priority::display_order(tasks, now.naive_local());
            match priority::manual_reorder(rendered.clone(), moved_id, target_id) {
                Some(reordered) => {
                    data.tasks = reordered;
                    resort(data, now);
                    Ok((data.tasks.clone(), vec![StoreSlice::Tasks]))
                }
                None => {
                    data.tasks = rendered;
                    Err(TaskError::NotFound(moved_id.to_string()))
                }
            }
        })
    }

    pub fn set_user_name(&self, name: &str) -> Result<(), TaskError> {
        let name = name.trim().to_string();
        self.mutate(|data| {
            data.user_name = name;
            Ok(((), vec![StoreSlice::UserName]))
        })
    }

    pub fn set_semester(&self, start: &str, end: &str) -> Result<(), TaskError> {
        check_semester(start, end)?;
        let (start, end) = (start.trim().to_string(), end.trim().to_string());
        self.mutate(|data| {
            data.semester_start_date = start;
            data.semester_end_date = end;
            Ok(((), vec![StoreSlice::Semester]))
        })
    }

    pub fn set_task_filter(&self, filter: &str) -> Result<(), TaskError> {
        let filter = filter.trim().to_string();
        self.mutate(|data| {
            data.task_filter = filter;
            Ok(((), vec![StoreSlice::TaskFilter]))
        })
    }

    /// Clears the completed-task history. Returns how many entries were dropped.
    pub fn reset_completed(&self) -> usize {
        let result = self.mutate(|data| {
            let cleared = data.completed_tasks.len();
            data.completed_tasks.clear();
            Ok((cleared, vec![StoreSlice::CompletedTasks]))
        });
        result.unwrap_or_default()
    }

    /// Writes every non-empty field of `bundle` into the store in one step.
    ///
    /// Empty strings and empty lists count as absent, so they leave the current
    /// value in place. Validation happens before anything is written: on error
    /// the store is unchanged and nobody is notified.
    pub fn restore(&self, bundle: PartialBundle) -> Result<Vec<StoreSlice>, TaskError> {
        let tasks = bundle.tasks.filter(|list| !list.is_empty());
        let completed = bundle.completed_tasks.filter(|list| !list.is_empty());
        let user_name = bundle.user_name.filter(|s| !s.is_empty());
        let start = bundle.semester_start_date.filter(|s| !s.is_empty());
        let end = bundle.semester_end_date.filter(|s| !s.is_empty());
        let filter = bundle.task_filter.filter(|s| !s.is_empty());

        if let Some(tasks) = &tasks {
            check_tasks(tasks)?;
        }
        if let Some(completed) = &completed {
            check_tasks(completed)?;
        }
        for date in [&start, &end].into_iter().flatten() {
            parse_civil_date(date)?;
        }

        self.mutate(|data| {
            let mut changed = Vec::new();
            if start.is_some() || end.is_some() {
                check_semester(
                    start.as_deref().unwrap_or(&data.semester_start_date),
                    end.as_deref().unwrap_or(&data.semester_end_date),
                )?;
            }
            if let Some(tasks) = tasks {
                data.tasks = tasks;
                changed.push(StoreSlice::Tasks);
            }
            if let Some(completed) = completed {
                data.completed_tasks = completed;
                changed.push(StoreSlice::CompletedTasks);
            }
            if let Some(user_name) = user_name {
                data.user_name = user_name;
                changed.push(StoreSlice::UserName);
            }
            if start.is_some() || end.is_some() {
                if let Some(start) = start {
                    data.semester_start_date = start;
                }
                if let Some(end) = end {
                    data.semester_end_date = end;
                }
                changed.push(StoreSlice::Semester);
            }
            if let Some(filter) = filter {
                data.task_filter = filter;
                changed.push(StoreSlice::TaskFilter);
            }
            Ok((changed.clone(), changed))
        })
    }
}
