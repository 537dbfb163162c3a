//! Native collaborators the core talks to: file dialogs, shell actions and
//! desktop notifications.

use std::path::{Path, PathBuf};

use serde::Serialize;

pub trait FilePicker {
    /// `None` means the user dismissed the dialog.
    fn open_file_dialog(&self) -> Option<Vec<PathBuf>>;
    fn save_file_dialog(&self, default_name: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShellResult {
    pub success: bool,
    pub error: Option<String>,
}

impl ShellResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

pub trait ShellActions {
    fn open_path(&self, path: &Path) -> ShellResult;
    fn show_in_folder(&self, path: &Path) -> ShellResult;
}

pub trait Notifier {
    fn notify(&self, title: &str, body: &str);
}

#[cfg(all(feature = "app", not(test)))]
pub use self::tauri_impl::TauriPlatform;

#[cfg(all(feature = "app", not(test)))]
mod tauri_impl {
    use std::path::{Path, PathBuf};

    use tauri::{AppHandle, Runtime};
    use tauri_plugin_dialog::DialogExt;
    use tauri_plugin_notification::NotificationExt;
    use tauri_plugin_opener::OpenerExt;

    use super::{FilePicker, Notifier, ShellActions, ShellResult};

    pub struct TauriPlatform<'a, R: Runtime> {
        app: &'a AppHandle<R>,
    }

    impl<'a, R: Runtime> TauriPlatform<'a, R> {
        pub fn new(app: &'a AppHandle<R>) -> Self {
            Self { app }
        }
    }

    impl<R: Runtime> FilePicker for TauriPlatform<'_, R> {
        fn open_file_dialog(&self) -> Option<Vec<PathBuf>> {
            let picked = self.app.dialog().file().blocking_pick_files()?;
            Some(
                picked
                    .into_iter()
                    .filter_map(|path| path.into_path().ok())
                    .collect(),
            )
        }

        fn save_file_dialog(&self, default_name: &str) -> Option<PathBuf> {
            self.app
                .dialog()
                .file()
                .set_file_name(default_name)
                .add_filter("JSON", &["json"])
                .blocking_save_file()
                .and_then(|path| path.into_path().ok())
        }
    }

    impl<R: Runtime> ShellActions for TauriPlatform<'_, R> {
        fn open_path(&self, path: &Path) -> ShellResult {
            match self
                .app
                .opener()
                .open_path(path.to_string_lossy(), None::<&str>)
            {
                Ok(()) => ShellResult::success(),
                Err(err) => ShellResult::failure(err.to_string()),
            }
        }

        fn show_in_folder(&self, path: &Path) -> ShellResult {
            match self.app.opener().reveal_item_in_dir(path) {
                Ok(()) => ShellResult::success(),
                Err(err) => ShellResult::failure(err.to_string()),
            }
        }
    }

    impl<R: Runtime> Notifier for TauriPlatform<'_, R> {
        fn notify(&self, title: &str, body: &str) {
            if let Err(err) = self
                .app
                .notification()
                .builder()
                .title(title)
                .body(body)
                .show()
            {
                log::warn!("notification failed: {err}");
            }
        }
    }
}
