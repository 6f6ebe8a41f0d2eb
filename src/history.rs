// Submitted-line history, capped and persisted oldest-first as plain text
use std::{fs, io, path::PathBuf};

use tracing::info;

use crate::error::StoreError;
use crate::files::write_atomically;
use crate::wildcard;

pub const MAX_HISTORY: usize = 100;
pub const SHOW_HISTORY: usize = 20;

pub struct History {
    path: PathBuf,
    /// Most recent first.
    items: Vec<String>,
    cap: usize,
}

impl History {
    pub fn new(path: PathBuf, cap: usize) -> Self {
        Self { path, items: Vec::new(), cap }
    }

    pub fn load(path: PathBuf, cap: usize) -> Result<Self, StoreError> {
        let mut history = Self::new(path, cap);
        history.reload()?;
        info!(path = ?history.path, count = history.items.len(), "loaded history");
        Ok(history)
    }

    /// Replaces the in-memory sequence with the file contents, truncated to the cap.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        self.items = text
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .take(self.cap)
            .map(str::to_string)
            .collect();
        Ok(self.items.len())
    }

    /// Writes the sequence oldest-first. Nothing is written when empty.
    pub fn save(&self) -> Result<bool, StoreError> {
        if self.items.is_empty() {
            return Ok(false);
        }
        let mut text = self.items.iter().rev().map(String::as_str).collect::<Vec<_>>().join("\n");
        text.push('\n');
        write_atomically(&self.path, &text)?;
        info!(path = ?self.path, count = self.items.len(), "saved history");
        Ok(true)
    }

    /// Prepends `line`, evicting the oldest entries past the cap. Blank lines
    /// and repeats of the most recent entry are not recorded.
    pub fn record(&mut self, line: &str) -> bool {
        if line.trim().is_empty() || self.items.first().is_some_and(|last| last == line) {
            return false;
        }
        self.items.insert(0, line.to_string());
        self.items.truncate(self.cap);
        true
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Most recent first, the order arrow-key recall walks.
    pub fn entries(&self) -> &[String] {
        &self.items
    }

    /// The last `count` entries (all when `None`), oldest first.
    pub fn window(&self, count: Option<usize>) -> Vec<&str> {
        let count = count.unwrap_or(self.items.len()).min(self.items.len());
        self.items[..count].iter().rev().map(String::as_str).collect()
    }

    /// Entries matching any pattern, oldest first.
    pub fn matching<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<&str> {
        let patterns = wildcard::compile_all(patterns);
        self.items
            .iter()
            .rev()
            .filter(|line| wildcard::matches_any(line, &patterns))
            .map(String::as_str)
            .collect()
    }

    pub fn remove_matching<S: AsRef<str>>(&mut self, patterns: &[S]) -> usize {
        let patterns = wildcard::compile_all(patterns);
        let before = self.items.len();
        self.items.retain(|line| !wildcard::matches_any(line, &patterns));
        before - self.items.len()
    }
}
