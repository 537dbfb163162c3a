use chrono::{DateTime, Local};
use serde_json::Value;
use std::path::Path;

use crate::backup::BackupError;
use crate::models::{SnapshotInfo, StoreData, Task, TaskDraft};
use crate::platform::{FilePicker, Notifier, ShellActions, ShellResult};
use crate::state::AppState;
use crate::stats::{self, StatsSummary, DEFAULT_HISTORY_DAYS};

#[cfg(all(feature = "app", not(test)))]
use crate::platform::TauriPlatform;
#[cfg(all(feature = "app", not(test)))]
use tauri::{AppHandle, Manager, Runtime, State};

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Set when the user dismissed a dialog; not an error.
    pub canceled: bool,
}

trait CommandCtx: FilePicker + ShellActions + Notifier {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
        canceled: false,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
        canceled: false,
    }
}

fn canceled<T>() -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: None,
        canceled: true,
    }
}

fn backup_failure<T>(error: BackupError) -> CommandResult<T> {
    if error.is_canceled() {
        return canceled();
    }
    err(&error.to_string())
}

/// Saves the store and refreshes the auto-backup, then wraps `data`.
fn persisted<T>(state: &AppState, data: T) -> CommandResult<T> {
    if let Err(error) = state.persist() {
        return err(&format!("storage error: {error}"));
    }
    ok(data)
}

#[cfg(all(feature = "app", not(test)))]
impl<R: Runtime> CommandCtx for TauriPlatform<'_, R> {}

fn load_state_impl(state: &AppState) -> CommandResult<StoreData> {
    ok(state.store.data())
}

fn create_task_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    draft: TaskDraft,
) -> CommandResult<Task> {
    match state.store.create_task(draft, ctx.now()) {
        Ok(task) => persisted(state, task),
        Err(error) => err(&error.to_string()),
    }
}

fn update_task_impl(ctx: &impl CommandCtx, state: &AppState, task: Task) -> CommandResult<Task> {
    match state.store.update_task(task, ctx.now()) {
        Ok(task) => persisted(state, task),
        Err(error) => err(&error.to_string()),
    }
}

fn cycle_task_status_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: String,
) -> CommandResult<Task> {
    match state.store.cycle_status(&task_id, ctx.now()) {
        Ok(task) => persisted(state, task),
        Err(error) => err(&error.to_string()),
    }
}

fn delete_task_impl(state: &AppState, task_id: String) -> CommandResult<bool> {
    match state.store.delete_task(&task_id) {
        Ok(_) => persisted(state, true),
        Err(error) => err(&error.to_string()),
    }
}

fn add_attachments_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    task_id: String,
) -> CommandResult<Task> {
    let Some(paths) = ctx.open_file_dialog() else {
        return canceled();
    };
    let paths = paths
        .into_iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    match state.store.add_attachments(&task_id, paths) {
        Ok(task) => persisted(state, task),
        Err(error) => err(&error.to_string()),
    }
}

fn remove_attachment_impl(state: &AppState, task_id: String, path: String) -> CommandResult<Task> {
    match state.store.remove_attachment(&task_id, &path) {
        Ok(task) => persisted(state, task),
        Err(error) => err(&error.to_string()),
    }
}

fn open_attachment_impl(ctx: &impl CommandCtx, path: String) -> ShellResult {
    if path.trim().is_empty() {
        return ShellResult::failure("empty path");
    }
    ctx.open_path(Path::new(&path))
}

fn show_attachment_in_folder_impl(ctx: &impl CommandCtx, path: String) -> ShellResult {
    if path.trim().is_empty() {
        return ShellResult::failure("empty path");
    }
    ctx.show_in_folder(Path::new(&path))
}

fn smart_sort_tasks_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<Vec<Task>> {
    let tasks = state.store.smart_sort(ctx.now());
    persisted(state, tasks)
}

fn reorder_tasks_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    moved_id: String,
    target_id: String,
) -> CommandResult<Vec<Task>> {
    match state.store.reorder(&moved_id, &target_id, ctx.now()) {
        Ok(tasks) => persisted(state, tasks),
        Err(error) => err(&error.to_string()),
    }
}

fn set_user_name_impl(state: &AppState, name: String) -> CommandResult<bool> {
    match state.store.set_user_name(&name) {
        Ok(()) => persisted(state, true),
        Err(error) => err(&error.to_string()),
    }
}

fn set_semester_impl(state: &AppState, start: String, end: String) -> CommandResult<bool> {
    match state.store.set_semester(&start, &end) {
        Ok(()) => persisted(state, true),
        Err(error) => err(&error.to_string()),
    }
}

fn set_task_filter_impl(state: &AppState, filter: String) -> CommandResult<bool> {
    match state.store.set_task_filter(&filter) {
        Ok(()) => persisted(state, true),
        Err(error) => err(&error.to_string()),
    }
}

fn reset_stats_impl(state: &AppState) -> CommandResult<usize> {
    let cleared = state.store.reset_completed();
    persisted(state, cleared)
}

fn get_stats_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    days: Option<u32>,
) -> CommandResult<StatsSummary> {
    let data = state.store.data();
    let summary = stats::summarize(
        &data.completed_tasks,
        ctx.now(),
        stats::semester_range(&data),
        days.unwrap_or(DEFAULT_HISTORY_DAYS),
    );
    ok(summary)
}

fn list_backups_impl(state: &AppState) -> CommandResult<Vec<SnapshotInfo>> {
    match state.backups.list_backups() {
        Ok(list) => ok(list),
        Err(error) => backup_failure(error),
    }
}

fn load_backup_impl(state: &AppState, name: String) -> CommandResult<Value> {
    match state.backups.load_backup(&name) {
        Ok(bundle) => ok(bundle),
        Err(error) => backup_failure(error),
    }
}

fn delete_backup_impl(state: &AppState, name: String) -> CommandResult<bool> {
    match state.backups.delete_backup(&name) {
        Ok(()) => ok(true),
        Err(error) => backup_failure(error),
    }
}

fn create_snapshot_impl(state: &AppState) -> CommandResult<String> {
    match state.backups.save_snapshot() {
        Ok(name) => ok(name),
        Err(error) => backup_failure(error),
    }
}

fn restore_backup_impl(
    ctx: &impl CommandCtx,
    state: &AppState,
    name: String,
) -> CommandResult<StoreData> {
    if let Err(error) = state.backups.restore_backup(&name) {
        return backup_failure(error);
    }
    ctx.notify("Backup restored", &format!("Restored data from {name}"));
    persisted(state, state.store.data())
}

fn restore_all_data_impl(state: &AppState, bundle: Value) -> CommandResult<bool> {
    if !state.backups.restore_all_data(&bundle) {
        return err("backup rejected");
    }
    persisted(state, true)
}

fn export_backup_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<String> {
    match state.backups.export_backup(ctx) {
        Ok(path) => {
            let path = path.display().to_string();
            ctx.notify("Backup exported", &format!("Saved to {path}"));
            ok(path)
        }
        Err(error) => backup_failure(error),
    }
}

fn import_backup_impl(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<StoreData> {
    if let Err(error) = state.backups.import_backup(ctx) {
        return backup_failure(error);
    }
    ctx.notify("Backup imported", "Your data has been restored");
    persisted(state, state.store.data())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn load_state(state: State<AppState>) -> CommandResult<StoreData> {
    load_state_impl(state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn create_task(app: AppHandle, state: State<AppState>, draft: TaskDraft) -> CommandResult<Task> {
    let ctx = TauriPlatform::new(&app);
    create_task_impl(&ctx, state.inner(), draft)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn update_task(app: AppHandle, state: State<AppState>, task: Task) -> CommandResult<Task> {
    let ctx = TauriPlatform::new(&app);
    update_task_impl(&ctx, state.inner(), task)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn cycle_task_status(
    app: AppHandle,
    state: State<AppState>,
    task_id: String,
) -> CommandResult<Task> {
    let ctx = TauriPlatform::new(&app);
    cycle_task_status_impl(&ctx, state.inner(), task_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn delete_task(state: State<AppState>, task_id: String) -> CommandResult<bool> {
    delete_task_impl(state.inner(), task_id)
}

// Dialog-backed commands run off the main thread: blocking dialogs would deadlock it.
#[cfg(all(feature = "app", not(test)))]
#[tauri::command(async)]
pub fn add_attachments(app: AppHandle, task_id: String) -> CommandResult<Task> {
    let ctx = TauriPlatform::new(&app);
    add_attachments_impl(&ctx, app.state::<AppState>().inner(), task_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn remove_attachment(
    state: State<AppState>,
    task_id: String,
    path: String,
) -> CommandResult<Task> {
    remove_attachment_impl(state.inner(), task_id, path)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn open_attachment(app: AppHandle, path: String) -> ShellResult {
    open_attachment_impl(&TauriPlatform::new(&app), path)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn show_attachment_in_folder(app: AppHandle, path: String) -> ShellResult {
    show_attachment_in_folder_impl(&TauriPlatform::new(&app), path)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn smart_sort_tasks(app: AppHandle, state: State<AppState>) -> CommandResult<Vec<Task>> {
    let ctx = TauriPlatform::new(&app);
    smart_sort_tasks_impl(&ctx, state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn reorder_tasks(
    app: AppHandle,
    state: State<AppState>,
    moved_id: String,
    target_id: String,
) -> CommandResult<Vec<Task>> {
    let ctx = TauriPlatform::new(&app);
    reorder_tasks_impl(&ctx, state.inner(), moved_id, target_id)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn set_user_name(state: State<AppState>, name: String) -> CommandResult<bool> {
    set_user_name_impl(state.inner(), name)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn set_semester(state: State<AppState>, start: String, end: String) -> CommandResult<bool> {
    set_semester_impl(state.inner(), start, end)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn set_task_filter(state: State<AppState>, filter: String) -> CommandResult<bool> {
    set_task_filter_impl(state.inner(), filter)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn reset_stats(state: State<AppState>) -> CommandResult<usize> {
    reset_stats_impl(state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn get_stats(
    app: AppHandle,
    state: State<AppState>,
    days: Option<u32>,
) -> CommandResult<StatsSummary> {
    let ctx = TauriPlatform::new(&app);
    get_stats_impl(&ctx, state.inner(), days)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn list_backups(state: State<AppState>) -> CommandResult<Vec<SnapshotInfo>> {
    list_backups_impl(state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn load_backup(state: State<AppState>, name: String) -> CommandResult<Value> {
    load_backup_impl(state.inner(), name)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn delete_backup(state: State<AppState>, name: String) -> CommandResult<bool> {
    delete_backup_impl(state.inner(), name)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn create_snapshot(state: State<AppState>) -> CommandResult<String> {
    create_snapshot_impl(state.inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn restore_backup(
    app: AppHandle,
    state: State<AppState>,
    name: String,
) -> CommandResult<StoreData> {
    let ctx = TauriPlatform::new(&app);
    restore_backup_impl(&ctx, state.inner(), name)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command]
pub fn restore_all_data(state: State<AppState>, bundle: Value) -> CommandResult<bool> {
    restore_all_data_impl(state.inner(), bundle)
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command(async)]
pub fn export_backup(app: AppHandle) -> CommandResult<String> {
    let ctx = TauriPlatform::new(&app);
    export_backup_impl(&ctx, app.state::<AppState>().inner())
}

#[cfg(all(feature = "app", not(test)))]
#[tauri::command(async)]
pub fn import_backup(app: AppHandle) -> CommandResult<StoreData> {
    let ctx = TauriPlatform::new(&app);
    import_backup_impl(&ctx, app.state::<AppState>().inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupBundle, TaskStatus};
    use crate::storage::{MemoryGateway, SnapshotGateway, Storage, StorageError, AUTO_BACKUP_NAME};
    use chrono::TimeZone;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Records every snapshot write on top of an in-memory gateway.
    #[derive(Default)]
    struct RecordingGateway {
        inner: MemoryGateway,
        writes: Mutex<Vec<String>>,
    }

    impl RecordingGateway {
        fn auto_writes(&self) -> usize {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|name| name.as_str() == AUTO_BACKUP_NAME)
                .count()
        }
    }

    impl SnapshotGateway for RecordingGateway {
        fn write_snapshot(&self, name: &str, bundle: &BackupBundle) -> Result<(), StorageError> {
            self.writes.lock().unwrap().push(name.to_string());
            self.inner.write_snapshot(name, bundle)
        }
        fn read_snapshot(&self, name: &str) -> Result<Value, StorageError> {
            self.inner.read_snapshot(name)
        }
        fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StorageError> {
            self.inner.list_snapshots()
        }
        fn delete_snapshot(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete_snapshot(name)
        }
        fn export_to(&self, path: &Path, bundle: &BackupBundle) -> Result<(), StorageError> {
            self.inner.export_to(path, bundle)
        }
        fn import_from(&self, path: &Path) -> Result<Value, StorageError> {
            self.inner.import_from(path)
        }
    }

    struct TestCtx {
        root: tempfile::TempDir,
        now: DateTime<Local>,
        open_result: Mutex<Option<Vec<PathBuf>>>,
        save_result: Mutex<Option<PathBuf>>,
        opened: Mutex<Vec<PathBuf>>,
        revealed: Mutex<Vec<PathBuf>>,
        notifications: Mutex<Vec<(String, String)>>,
    }

    impl TestCtx {
        fn new() -> Self {
            Self {
                root: tempfile::tempdir().unwrap(),
                now: Local.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).single().unwrap(),
                open_result: Mutex::new(None),
                save_result: Mutex::new(None),
                opened: Mutex::new(Vec::new()),
                revealed: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
            }
        }

        fn root_path(&self) -> &Path {
            self.root.path()
        }

        fn pick_for_open(&self, paths: Option<Vec<PathBuf>>) {
            *self.open_result.lock().unwrap() = paths;
        }

        fn pick_for_save(&self, path: Option<PathBuf>) {
            *self.save_result.lock().unwrap() = path;
        }

        fn notification_count(&self) -> usize {
            self.notifications.lock().unwrap().len()
        }
    }

    impl FilePicker for TestCtx {
        fn open_file_dialog(&self) -> Option<Vec<PathBuf>> {
            self.open_result.lock().unwrap().clone()
        }

        fn save_file_dialog(&self, _default_name: &str) -> Option<PathBuf> {
            self.save_result.lock().unwrap().clone()
        }
    }

    impl ShellActions for TestCtx {
        fn open_path(&self, path: &Path) -> ShellResult {
            self.opened.lock().unwrap().push(path.to_path_buf());
            if path.exists() {
                ShellResult::success()
            } else {
                ShellResult::failure("file not found")
            }
        }

        fn show_in_folder(&self, path: &Path) -> ShellResult {
            self.revealed.lock().unwrap().push(path.to_path_buf());
            ShellResult::success()
        }
    }

    impl Notifier for TestCtx {
        fn notify(&self, title: &str, body: &str) {
            self.notifications
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
        }
    }

    impl CommandCtx for TestCtx {
        fn now(&self) -> DateTime<Local> {
            self.now
        }
    }

    fn make_state(ctx: &TestCtx) -> AppState {
        AppState::open(ctx.root_path().to_path_buf())
    }

    fn recording_state(ctx: &TestCtx) -> (AppState, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let state = AppState::with_gateway(
            Storage::new(ctx.root_path().to_path_buf()),
            gateway.clone(),
        );
        (state, gateway)
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            ..TaskDraft::default()
        }
    }

    fn create(ctx: &TestCtx, state: &AppState, title: &str) -> Task {
        create_task_impl(ctx, state, draft(title)).data.unwrap()
    }

    #[test]
    fn ok_err_and_canceled_helpers_construct_expected_shape() {
        let r = ok(123);
        assert!(r.ok && !r.canceled);
        assert_eq!(r.data, Some(123));
        assert_eq!(r.error, None);

        let r: CommandResult<i32> = err("nope");
        assert!(!r.ok && !r.canceled);
        assert_eq!(r.error, Some("nope".to_string()));

        let r: CommandResult<i32> = canceled();
        assert!(!r.ok && r.canceled);
        assert_eq!(r.error, None);

        let r: CommandResult<i32> = backup_failure(BackupError::Canceled);
        assert!(r.canceled);
        let r: CommandResult<i32> = backup_failure(BackupError::Validation("bad".into()));
        assert!(!r.canceled);
        assert_eq!(r.error.as_deref(), Some("invalid backup: bad"));
    }

    #[test]
    fn every_mutation_triggers_exactly_one_auto_backup() {
        let ctx = TestCtx::new();
        let (state, gateway) = recording_state(&ctx);

        let task = create(&ctx, &state, "first");
        assert_eq!(gateway.auto_writes(), 1);
        let other = create(&ctx, &state, "second");
        assert_eq!(gateway.auto_writes(), 2);

        let mut edit = task.clone();
        edit.title = "first, edited".into();
        assert!(update_task_impl(&ctx, &state, edit).ok);
        assert_eq!(gateway.auto_writes(), 3);

        assert!(cycle_task_status_impl(&ctx, &state, task.id.clone()).ok);
        assert_eq!(gateway.auto_writes(), 4);

        assert!(reorder_tasks_impl(&ctx, &state, task.id.clone(), other.id.clone()).ok);
        assert_eq!(gateway.auto_writes(), 5);

        assert!(smart_sort_tasks_impl(&ctx, &state).ok);
        assert_eq!(gateway.auto_writes(), 6);

        assert!(set_user_name_impl(&state, "Pat".into()).ok);
        assert!(set_semester_impl(&state, "2026-09-01".into(), "2026-12-20".into()).ok);
        assert!(set_task_filter_impl(&state, "academic".into()).ok);
        assert_eq!(gateway.auto_writes(), 9);

        assert!(delete_task_impl(&state, other.id).ok);
        assert_eq!(gateway.auto_writes(), 10);
        assert!(reset_stats_impl(&state).ok);
        assert_eq!(gateway.auto_writes(), 11);

        let saved = gateway.read_snapshot(AUTO_BACKUP_NAME).unwrap();
        assert_eq!(saved["userName"], "Pat");
    }

    #[test]
    fn rejected_mutations_do_not_back_up() {
        let ctx = TestCtx::new();
        let (state, gateway) = recording_state(&ctx);

        let res = create_task_impl(&ctx, &state, draft("  "));
        assert!(!res.ok);
        assert_eq!(res.error.as_deref(), Some("task title cannot be empty"));
        assert!(!delete_task_impl(&state, "missing".into()).ok);
        assert!(!cycle_task_status_impl(&ctx, &state, "missing".into()).ok);
        assert!(!set_semester_impl(&state, "2026-12-01".into(), "2026-09-01".into()).ok);
        assert!(!reorder_tasks_impl(&ctx, &state, "a".into(), "b".into()).ok);
        assert_eq!(gateway.auto_writes(), 0);
        assert!(!ctx.root_path().join("store.json").exists());
    }

    #[test]
    fn task_commands_persist_to_store_json() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        let task = create(&ctx, &state, "essay");
        assert_eq!(task.created_at, ctx.now.with_timezone(&chrono::Utc));

        let progressed = cycle_task_status_impl(&ctx, &state, task.id.clone()).data.unwrap();
        assert_eq!(progressed.status, TaskStatus::InProgress);
        let done = cycle_task_status_impl(&ctx, &state, task.id.clone()).data.unwrap();
        assert_eq!(done.status, TaskStatus::Complete);

        let loaded = load_state_impl(&state).data.unwrap();
        assert!(loaded.tasks.is_empty());
        assert_eq!(loaded.completed_tasks.len(), 1);

        let on_disk = Storage::new(ctx.root_path().to_path_buf()).load_store().unwrap();
        assert_eq!(on_disk.data, loaded);
    }

    #[test]
    fn attachments_use_picker_and_shell() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        let task = create(&ctx, &state, "with files");

        ctx.pick_for_open(None);
        let res = add_attachments_impl(&ctx, &state, task.id.clone());
        assert!(res.canceled && !res.ok);

        let file = ctx.root_path().join("notes.pdf");
        fs::write(&file, b"pdf").unwrap();
        ctx.pick_for_open(Some(vec![file.clone(), file.clone()]));
        let updated = add_attachments_impl(&ctx, &state, task.id.clone()).data.unwrap();
        let stored = file.to_string_lossy().into_owned();
        assert_eq!(updated.attachments, vec![stored.clone()]);

        assert!(open_attachment_impl(&ctx, stored.clone()).success);
        let missing = open_attachment_impl(&ctx, "/does/not/exist.pdf".into());
        assert!(!missing.success);
        assert!(missing.error.is_some());
        assert!(!open_attachment_impl(&ctx, " ".into()).success);
        assert!(show_attachment_in_folder_impl(&ctx, stored.clone()).success);
        assert_eq!(ctx.revealed.lock().unwrap().len(), 1);

        let updated = remove_attachment_impl(&state, task.id, stored).data.unwrap();
        assert!(updated.attachments.is_empty());
    }

    #[test]
    fn stats_reflect_completed_history() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        let task = create(&ctx, &state, "done today");
        cycle_task_status_impl(&ctx, &state, task.id.clone());
        cycle_task_status_impl(&ctx, &state, task.id);

        let summary = get_stats_impl(&ctx, &state, Some(3)).data.unwrap();
        assert_eq!(summary.total_completed, 1);
        assert_eq!(summary.today.total, 1);
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.daily.len(), 3);

        assert_eq!(reset_stats_impl(&state).data, Some(1));
        let summary = get_stats_impl(&ctx, &state, None).data.unwrap();
        assert_eq!(summary.total_completed, 0);
        assert_eq!(summary.daily.len(), DEFAULT_HISTORY_DAYS as usize);
    }

    #[test]
    fn export_and_import_cover_cancel_success_and_failure() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        create(&ctx, &state, "exported");
        set_user_name_impl(&state, "Dana".into());

        ctx.pick_for_save(None);
        let res = export_backup_impl(&ctx, &state);
        assert!(res.canceled);
        assert_eq!(ctx.notification_count(), 0);

        let target = ctx.root_path().join("exports").join("mine.json");
        ctx.pick_for_save(Some(target.clone()));
        let res = export_backup_impl(&ctx, &state);
        assert!(res.ok);
        assert!(target.is_file());
        assert_eq!(ctx.notification_count(), 1);

        set_user_name_impl(&state, "Changed".into());
        ctx.pick_for_open(None);
        assert!(import_backup_impl(&ctx, &state).canceled);

        ctx.pick_for_open(Some(vec![target.clone()]));
        let res = import_backup_impl(&ctx, &state);
        assert!(res.ok);
        assert_eq!(res.data.unwrap().user_name, "Dana");
        assert_eq!(ctx.notification_count(), 2);

        let bogus = ctx.root_path().join("bogus.json");
        fs::write(&bogus, b"[1, 2]").unwrap();
        ctx.pick_for_open(Some(vec![bogus]));
        let res = import_backup_impl(&ctx, &state);
        assert!(!res.ok && !res.canceled);
        assert!(res.error.is_some());
        assert_eq!(state.store.data().user_name, "Dana");
        assert_eq!(ctx.notification_count(), 2);
    }

    #[test]
    fn recovery_feed_lists_restores_and_protects_auto_slot() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        set_user_name_impl(&state, "Before".into());
        let name = create_snapshot_impl(&state).data.unwrap();
        set_user_name_impl(&state, "After".into());

        let list = list_backups_impl(&state).data.unwrap();
        assert!(list.iter().any(|s| s.name == name && !s.is_auto));
        assert!(list.iter().any(|s| s.name == AUTO_BACKUP_NAME && s.is_auto));

        let bundle = load_backup_impl(&state, name.clone()).data.unwrap();
        assert_eq!(bundle["userName"], "Before");

        let restored = restore_backup_impl(&ctx, &state, name.clone()).data.unwrap();
        assert_eq!(restored.user_name, "Before");
        assert_eq!(ctx.notification_count(), 1);
        let on_disk = Storage::new(ctx.root_path().to_path_buf()).load_store().unwrap();
        assert_eq!(on_disk.data.user_name, "Before");

        let res = delete_backup_impl(&state, AUTO_BACKUP_NAME.into());
        assert!(!res.ok);
        assert!(delete_backup_impl(&state, name.clone()).ok);
        assert!(!restore_backup_impl(&ctx, &state, name).ok);
        assert!(!load_backup_impl(&state, "../store.json".into()).ok);
    }

    #[test]
    fn restore_all_data_rejects_invalid_bundles() {
        let ctx = TestCtx::new();
        let state = make_state(&ctx);
        set_user_name_impl(&state, "Kept".into());

        let res = restore_all_data_impl(&state, serde_json::json!({ "version": "3.0.0" }));
        assert!(!res.ok);
        assert_eq!(state.store.data().user_name, "Kept");

        let res = restore_all_data_impl(&state, serde_json::json!({ "userName": "New" }));
        assert!(res.ok);
        assert_eq!(state.store.data().user_name, "New");
    }

    #[test]
    fn store_write_failure_still_keeps_the_edit() {
        let ctx = TestCtx::new();
        let occupied = ctx.root_path().join("occupied");
        fs::write(&occupied, b"x").unwrap();
        let gateway = Arc::new(RecordingGateway::default());
        let state = AppState::with_gateway(Storage::new(occupied), gateway.clone());

        let res = create_task_impl(&ctx, &state, draft("unsaved"));
        assert!(!res.ok);
        assert!(res.error.unwrap().starts_with("storage error"));
        assert_eq!(state.store.tasks().len(), 1);
        assert_eq!(gateway.auto_writes(), 1);
    }

    #[test]
    fn mutations_hand_auto_backups_to_the_attached_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let ctx = TestCtx::new();
        let (state, gateway) = recording_state(&ctx);
        state.backups.attach_runtime(runtime.handle().clone());

        assert!(create_task_impl(&ctx, &state, draft("background")).ok);
        assert!(ctx.root_path().join("store.json").exists());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while gateway.auto_writes() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(gateway.auto_writes(), 1);
        let saved = gateway.read_snapshot(AUTO_BACKUP_NAME).unwrap();
        assert_eq!(saved["tasks"][0]["title"], "background");
    }
}
