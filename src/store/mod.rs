//! Persistence layer: the JSON-backed response history.

pub mod history;

pub use history::{HistoryRecord, HistoryStore};
