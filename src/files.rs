// Persisted file helpers: atomic writes and the modification snapshot
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::StoreError;

/// Writes `contents` to a sibling temp file and renames it over `path`, so a
/// failed write never leaves a truncated document behind.
pub fn write_atomically(path: &Path, contents: &str) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Load-time modification times of the command document and history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    command_path: PathBuf,
    history_path: PathBuf,
    command: Option<SystemTime>,
    history: Option<SystemTime>,
}

impl Snapshot {
    pub fn capture(command_path: &Path, history_path: &Path) -> Self {
        Self {
            command_path: command_path.to_path_buf(),
            history_path: history_path.to_path_buf(),
            command: modified(command_path),
            history: modified(history_path),
        }
    }

    /// True when either file was created, removed or rewritten since capture.
    pub fn changed_externally(&self) -> bool {
        let command = modified(&self.command_path);
        let history = modified(&self.history_path);
        let changed = command != self.command || history != self.history;
        if changed {
            debug!(
                command = ?self.command_path,
                history = ?self.history_path,
                "persisted files changed since load"
            );
        }
        changed
    }

    /// Accepts the command document's current state as the baseline.
    pub fn refresh_command(&mut self) {
        self.command = modified(&self.command_path);
    }

    pub fn refresh_history(&mut self) {
        self.history = modified(&self.history_path);
    }
}
