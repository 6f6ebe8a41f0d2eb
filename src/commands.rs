// Named payloads, persisted as a YAML document of `name: payload`
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::files::write_atomically;
use crate::quotes::strip_quotes;
use crate::wildcard::{self, Wildcard};

/// Upper bound, in characters, on the synthesized `cmd ...` line offered
/// back by `get`.
pub const MAX_PASTE_LEN: usize = 4096;

/// Hand-edited documents may hold numbers or booleans; they are kept as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPayload {
    Text(String),
    Number(serde_yaml::Number),
    Flag(bool),
}

impl From<StoredPayload> for String {
    fn from(payload: StoredPayload) -> Self {
        match payload {
            StoredPayload::Text(text) => text,
            StoredPayload::Number(n) => n.to_string(),
            StoredPayload::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMatch {
    pub name: String,
    pub payload: String,
    /// False when the payload was blank or did not fit in the paste buffer.
    pub pasted: bool,
}

#[derive(Debug, Default)]
pub struct GetReport {
    pub matches: Vec<GetMatch>,
    /// `cmd '<payload>' ...`, offered to the input line but never submitted.
    pub line: Option<String>,
}

impl GetReport {
    pub fn pasted(&self) -> usize {
        self.matches.iter().filter(|m| m.pasted).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Stored { key: String, value: String },
    Skipped { key: String },
}

pub struct CommandStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl CommandStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, entries: BTreeMap::new() }
    }

    /// Loads the document at `path`; a missing file yields an empty store.
    pub fn load(path: PathBuf) -> Result<Self, StoreError> {
        let entries = read_document(&path)?;
        info!(path = ?path, count = entries.len(), "loaded commands");
        Ok(Self { path, entries })
    }

    /// Replaces the in-memory map with the document on disk.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        self.entries = read_document(&self.path)?;
        info!(path = ?self.path, count = self.entries.len(), "reloaded commands");
        Ok(self.entries.len())
    }

    /// Writes the whole map back. An empty store leaves the file untouched and
    /// returns `false`.
    pub fn save(&self) -> Result<bool, StoreError> {
        if self.entries.is_empty() {
            return Ok(false);
        }
        let yaml = serde_yaml::to_string(&self.entries).map_err(|e| StoreError::yaml(&self.path, e))?;
        write_atomically(&self.path, &yaml)?;
        info!(path = ?self.path, count = self.entries.len(), "saved commands");
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Full listing, one `name: payload` per line.
    pub fn dump(&self) -> String {
        serde_yaml::to_string(&self.entries)
            .map(|yaml| yaml.trim_end().to_string())
            .unwrap_or_default()
    }

    pub fn get<S: AsRef<str>>(&self, patterns: &[S]) -> GetReport {
        let mut report = GetReport::default();
        let mut line = String::from("cmd");
        let mut length = line.chars().count();

        for pattern in patterns {
            let pattern: &str = pattern.as_ref();
            if pattern.trim().is_empty() {
                continue;
            }
            let Ok(wildcard) = Wildcard::new(pattern) else {
                continue;
            };
            for (name, payload) in self.entries.iter().filter(|(name, _)| wildcard.matches(name)) {
                let piece = format!(" '{payload}'");
                let piece_length = piece.chars().count();
                let pasted = !payload.trim().is_empty() && length + piece_length <= MAX_PASTE_LEN;
                if pasted {
                    line.push_str(&piece);
                    length += piece_length;
                }
                report.matches.push(GetMatch {
                    name: name.clone(),
                    payload: payload.clone(),
                    pasted,
                });
            }
        }

        if report.pasted() > 0 {
            report.line = Some(line);
        }
        report
    }

    /// Consumes `tokens` as `key=value` or as a `key value` pair. Values are
    /// stored quote-stripped; a blank key or value is skipped.
    pub fn set<S: AsRef<str>>(&mut self, tokens: &[S]) -> Vec<SetOutcome> {
        let mut outcomes = Vec::new();
        let mut tokens = tokens.iter().map(as_str);

        while let Some(token) = tokens.next() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, tokens.next()),
            };
            let value = value.map(strip_quotes).filter(|v| !v.trim().is_empty());
            match value {
                Some(value) if !key.trim().is_empty() => {
                    debug!(key, value, "set command");
                    self.entries.insert(key.to_string(), value.to_string());
                    outcomes.push(SetOutcome::Stored {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                _ => outcomes.push(SetOutcome::Skipped { key: key.to_string() }),
            }
        }
        outcomes
    }

    /// Stored entries whose name matches any pattern, in name order.
    pub fn matching<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<(String, String)> {
        let patterns = wildcard::compile_all(patterns);
        self.entries
            .iter()
            .filter(|(name, _)| wildcard::matches_any(name, &patterns))
            .map(|(name, payload)| (name.clone(), payload.clone()))
            .collect()
    }

    pub fn remove_all<S: AsRef<str>>(&mut self, names: &[S]) -> usize {
        let mut removed = 0;
        for name in names {
            let name: &str = name.as_ref();
            if self.entries.remove(name).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// The quote-stripped payload stored under `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .filter(|payload| !payload.trim().is_empty())
            .map(|payload| strip_quotes(payload))
    }

    /// A registered name wins; otherwise the token itself is the payload.
    pub fn payload_for<'a>(&'a self, token: &'a str) -> &'a str {
        self.resolve(token).unwrap_or_else(|| strip_quotes(token))
    }
}

fn as_str<S: AsRef<str>>(s: &S) -> &str {
    s.as_ref()
}

fn read_document(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let document: Option<BTreeMap<String, StoredPayload>> =
        serde_yaml::from_str(&text).map_err(|e| StoreError::yaml(path, e))?;
    Ok(document
        .unwrap_or_default()
        .into_iter()
        .map(|(name, payload)| (name, payload.into()))
        .collect())
}
