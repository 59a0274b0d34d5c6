use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// `ui_state.json` only ever holds a window rectangle and a folder path.
pub const MAX_UI_STATE_BYTES: u64 = 64 * 1024;

pub const UI_STATE_FILE: &str = "ui_state.json";

pub const MIN_WINDOW_WIDTH: u32 = 900;
pub const MIN_WINDOW_HEIGHT: u32 = 650;
pub const DEFAULT_WINDOW_WIDTH: u32 = 1200;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;

/// Outer window rectangle in logical points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowPlacement {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Default for WindowPlacement {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: DEFAULT_WINDOW_WIDTH,
            h: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

impl WindowPlacement {
    pub fn normalized(self, min_w: u32, min_h: u32) -> Self {
        Self {
            w: self.w.max(min_w),
            h: self.h.max(min_h),
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SavedUiState {
    #[serde(default)]
    pub window: Option<WindowPlacement>,
    #[serde(default)]
    pub maximized: bool,
    /// Last server folder picked through the directory dialog.
    #[serde(default)]
    pub last_directory: Option<PathBuf>,
}

#[derive(Debug)]
pub enum UiStateLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for UiStateLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiStateLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            UiStateLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            UiStateLoadError::Read(e) => write!(f, "read failed: {e}"),
            UiStateLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for UiStateLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UiStateLoadError::Metadata(e) => Some(e),
            UiStateLoadError::Read(e) => Some(e),
            UiStateLoadError::Parse(e) => Some(e),
            UiStateLoadError::TooLarge { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum UiStateSaveError {
    CreateDir(io::Error),
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for UiStateSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiStateSaveError::CreateDir(e) => write!(f, "state dir create failed: {e}"),
            UiStateSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            UiStateSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            UiStateSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for UiStateSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UiStateSaveError::CreateDir(e) => Some(e),
            UiStateSaveError::Serialize(e) => Some(e),
            UiStateSaveError::WriteTmp(e) => Some(e),
            UiStateSaveError::Rename(e) => Some(e),
        }
    }
}

pub fn ui_state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(UI_STATE_FILE)
}

pub fn load_ui_state_from_path(path: &Path) -> Result<SavedUiState, UiStateLoadError> {
    let meta = fs::metadata(path).map_err(UiStateLoadError::Metadata)?;
    if meta.len() > MAX_UI_STATE_BYTES {
        return Err(UiStateLoadError::TooLarge {
            size: meta.len(),
            max: MAX_UI_STATE_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(UiStateLoadError::Read)?;
    serde_json::from_str(&data).map_err(UiStateLoadError::Parse)
}

/// Missing or unreadable state means defaults.
pub fn load_ui_state(data_dir: &Path) -> SavedUiState {
    load_ui_state_from_path(&ui_state_path(data_dir)).unwrap_or_default()
}

pub fn save_ui_state_to_path(path: &Path, state: &SavedUiState) -> Result<(), UiStateSaveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(UiStateSaveError::CreateDir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(state).map_err(UiStateSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(UiStateSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(UiStateSaveError::Rename)?;
    Ok(())
}

pub fn save_ui_state_with_retry(path: &Path, state: &SavedUiState) -> Result<(), UiStateSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_ui_state_to_path(path, state) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(_) => {
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

/// Clamp a window placement into a monitor rectangle so a window saved on a
/// detached display comes back visible.
///
/// `rect` is `[left, top, right, bottom]` in logical points.
pub fn clamp_placement_in_rect(
    placement: WindowPlacement,
    min_w: u32,
    min_h: u32,
    margin: i32,
    rect: [i32; 4],
) -> WindowPlacement {
    let [left, top, right, bottom] = rect;
    let monitor_w = (right - left).max(min_w as i32);
    let monitor_h = (bottom - top).max(min_h as i32);

    let max_w = (monitor_w - margin * 2).max(min_w as i32) as u32;
    let max_h = (monitor_h - margin * 2).max(min_h as i32) as u32;

    let w = placement.w.clamp(min_w, max_w);
    let h = placement.h.clamp(min_h, max_h);

    let max_x = (right - w as i32).max(left);
    let max_y = (bottom - h as i32).max(top);

    WindowPlacement {
        x: placement.x.clamp(left, max_x),
        y: placement.y.clamp(top, max_y),
        w,
        h,
    }
}
