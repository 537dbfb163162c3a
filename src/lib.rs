// Learn more about Tauri commands at https://tauri.app/develop/calling-rust/
pub mod backup;
#[cfg_attr(not(feature = "app"), allow(dead_code))]
mod commands;
pub mod config;
pub mod events;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod platform;
pub mod priority;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod storage;
pub mod store;

#[cfg(all(feature = "app", not(test)))]
use std::sync::Arc;

#[cfg(all(feature = "app", not(test)))]
use tauri::{Emitter, Manager, RunEvent};

#[cfg(all(feature = "app", not(test)))]
use crate::commands::*;
#[cfg(all(feature = "app", not(test)))]
use crate::events::{SliceUpdate, StoreSlice, EVENT_STORE_UPDATED};
#[cfg(all(feature = "app", not(test)))]
use crate::state::AppState;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
#[cfg(all(feature = "app", not(test)))]
pub fn run() {
    let app = tauri::Builder::default()
        .plugin(tauri_plugin_notification::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let root = app.path().app_data_dir()?;
            if let Err(err) = logging::init_logging(&root) {
                eprintln!("failed to initialize logging: {err}");
            }

            let state = AppState::open(root);
            // Sync commands run on the main thread, outside any runtime context.
            let runtime =
                tauri::async_runtime::block_on(async { tokio::runtime::Handle::current() });
            state.backups.attach_runtime(runtime);

            let handle = app.handle().clone();
            state.store.subscribe(
                &StoreSlice::ALL,
                Arc::new(move |update: &SliceUpdate| {
                    if let Err(err) = handle.emit(EVENT_STORE_UPDATED, update) {
                        log::warn!("failed to emit {EVENT_STORE_UPDATED}: {err}");
                    }
                }),
            );

            let backups = state.backups.clone();
            tauri::async_runtime::spawn(async move {
                backups.start_snapshot_timer();
            });

            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            load_state,
            create_task,
            update_task,
            cycle_task_status,
            delete_task,
            add_attachments,
            remove_attachment,
            open_attachment,
            show_attachment_in_folder,
            smart_sort_tasks,
            reorder_tasks,
            set_user_name,
            set_semester,
            set_task_filter,
            reset_stats,
            get_stats,
            list_backups,
            load_backup,
            delete_backup,
            create_snapshot,
            restore_backup,
            restore_all_data,
            export_backup,
            import_backup,
        ])
        .build(tauri::generate_context!())
        .expect("error while running tauri application");

    app.run(|handle, event| {
        if let RunEvent::Exit = event {
            if let Some(state) = handle.try_state::<AppState>() {
                state.backups.stop_snapshot_timer();
            }
            log::info!("application exit");
        }
    });
}
