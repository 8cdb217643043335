//! Response history: which messages have already been answered.
//!
//! A single JSON document maps message identity to a `HistoryRecord`:
//!
//! ```json
//! { "<id@example.com>": { "sender": "...", "subject": "...", "timestamp": 1700000000.0, "responded": true } }
//! ```
//!
//! The document is rewritten after every mutation. Load and save failures are
//! logged and swallowed; the in-memory map stays authoritative for the rest of
//! the process lifetime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::PersistenceError;

const SECS_PER_DAY: f64 = 86_400.0;

/// One answered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sender: String,
    #[serde(default)]
    pub subject: Option<String>,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: f64,
    pub responded: bool,
}

/// Persisted mapping from message identity to `HistoryRecord`.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: BTreeMap<String, HistoryRecord>,
}

impl HistoryStore {
    /// Load the history document at `path`.
    ///
    /// A missing or unreadable document yields an empty store. Individual
    /// entries that do not fit `HistoryRecord` are dropped and the cleaned
    /// document is written back.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self {
            path,
            records: BTreeMap::new(),
        };

        if !store.path.exists() {
            info!(path = %store.path.display(), "No response history yet, starting empty");
            return store;
        }

        let raw: BTreeMap<String, serde_json::Value> = match read_document(&store.path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %store.path.display(), error = %e, "Error loading response history");
                return store;
            }
        };

        let total = raw.len();
        for (id, value) in raw {
            match serde_json::from_value::<HistoryRecord>(value) {
                Ok(record) => {
                    store.records.insert(id, record);
                }
                Err(e) => warn!(id = %id, error = %e, "Dropping malformed history entry"),
            }
        }

        info!(entries = store.records.len(), "Loaded response history");
        if store.records.len() != total {
            store.persist();
        }
        store
    }

    /// Drop every record older than `retention_days` at `now`.
    ///
    /// A record survives when `now - timestamp <= retention`. The document is
    /// rewritten only if something was removed. Returns the number removed.
    pub fn prune(&mut self, retention_days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = epoch_secs(now) - f64::from(retention_days) * SECS_PER_DAY;
        let before = self.records.len();
        self.records.retain(|_, record| record.timestamp >= cutoff);
        let removed = before - self.records.len();

        if removed > 0 {
            self.persist();
            info!(
                removed,
                remaining = self.records.len(),
                "Historical data cleaned up"
            );
        }
        removed
    }

    /// Record `identity` as answered at `now` and persist.
    pub fn record(&mut self, identity: &str, sender: &str, subject: &str, now: DateTime<Utc>) {
        self.records.insert(
            identity.to_string(),
            HistoryRecord {
                sender: sender.to_string(),
                subject: Some(subject.to_string()),
                timestamp: epoch_secs(now),
                responded: true,
            },
        );
        self.persist();
        debug!(id = %identity, "Recorded response");
    }

    /// Whether `identity` has already been answered.
    pub fn has_responded(&self, identity: &str) -> bool {
        self.records.get(identity).is_some_and(|r| r.responded)
    }

    pub fn get(&self, identity: &str) -> Option<&HistoryRecord> {
        self.records.get(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the document, logging instead of failing.
    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(path = %self.path.display(), error = %e, "Error saving response history");
        }
    }

    /// Write to a sibling temp file, then rename over the document.
    fn save(&self) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(&self.records)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|source| PersistenceError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

fn read_document(path: &Path) -> Result<BTreeMap<String, serde_json::Value>, PersistenceError> {
    let text = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
