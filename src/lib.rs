pub mod api;
pub mod config;
pub mod pipeline;
pub mod storage;

use std::path::{Path, PathBuf};

/// Directory holding `.env` and the default uploads dir when none is given.
pub fn default_app_root() -> PathBuf {
    std::env::var("IMGTASKS_APP_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).to_path_buf())
}
