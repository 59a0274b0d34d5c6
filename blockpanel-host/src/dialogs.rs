use std::path::PathBuf;

use tracing::warn;

use crate::bridge::DirectoryPicker;

/// Native folder picker backed by `rfd`.
#[derive(Debug, Clone)]
pub struct NativeDirectoryPicker {
    title: String,
}

impl NativeDirectoryPicker {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Default for NativeDirectoryPicker {
    fn default() -> Self {
        Self::new("Select server folder")
    }
}

impl DirectoryPicker for NativeDirectoryPicker {
    async fn pick_directory(&self) -> Option<PathBuf> {
        let title = self.title.clone();
        // The dialog blocks its thread until the user answers.
        let picked = tokio::task::spawn_blocking(move || {
            rfd::FileDialog::new().set_title(&title).pick_folder()
        })
        .await;
        match picked {
            Ok(picked) => picked,
            Err(err) => {
                warn!("directory dialog task failed: {err}");
                None
            }
        }
    }
}

/// Blocking native error box.
pub fn show_error(title: &str, message: &str) {
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(title)
        .set_description(message)
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}
