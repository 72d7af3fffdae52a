//! # Message Journal
//!
//! Log lines attributed to ebMS message identities. A single pipeline run can
//! touch several identities (a received user message and the receipt created
//! for it), so entries are keyed by whatever identity is current on the
//! context when a step writes them.

use crate::models::message::As4Message;
use serde::{Deserialize, Serialize};

/// Immutable log lines for one message identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLogEntry {
    pub ebms_message_id: Option<String>,
    pub ref_to_message_id: Option<String>,
    pub log_entries: Vec<String>,
}

impl JournalLogEntry {
    pub fn new(
        ebms_message_id: Option<String>,
        ref_to_message_id: Option<String>,
        log_entry: impl Into<String>,
    ) -> Self {
        Self {
            ebms_message_id,
            ref_to_message_id,
            log_entries: vec![log_entry.into()],
        }
    }

    /// Attribute a log line to the primary identity of the given message.
    ///
    /// Returns `None` when the message carries no message unit.
    pub fn create_from(message: &As4Message, log_entry: impl Into<String>) -> Option<Self> {
        let unit = message.primary_message_unit()?;
        Some(Self::new(
            Some(unit.message_id().to_string()),
            unit.ref_to_message_id().map(str::to_string),
            log_entry,
        ))
    }

    /// Identity used to merge entries: the ebMS id, or the ref-to id when absent
    pub fn key(&self) -> Option<&str> {
        self.ebms_message_id
            .as_deref()
            .or(self.ref_to_message_id.as_deref())
    }
}

/// Ordered collection of journal entries, one per identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalLogEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = JournalLogEntry>) -> Self {
        let mut journal = Self::new();
        for entry in entries {
            journal.push(entry);
        }
        journal
    }

    /// Append an entry, folding it into an existing identity when present
    pub fn push(&mut self, entry: JournalLogEntry) {
        let existing = entry
            .key()
            .and_then(|key| self.entries.iter_mut().find(|e| e.key() == Some(key)));

        match existing {
            Some(current) => {
                if current.ref_to_message_id.is_none() {
                    current.ref_to_message_id = entry.ref_to_message_id;
                }
                current.log_entries.extend(entry.log_entries);
            }
            None => self.entries.push(entry),
        }
    }

    /// Merge another journal into this one, preserving execution order per identity
    pub fn merge(&mut self, other: Journal) {
        for entry in other.entries {
            self.push(entry);
        }
    }

    pub fn entries(&self) -> &[JournalLogEntry] {
        &self.entries
    }

    /// Log lines recorded for the given ebMS message id (or ref-to id)
    pub fn log_entries_for(&self, message_id: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.key() == Some(message_id))
            .flat_map(|e| e.log_entries.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl IntoIterator for Journal {
    type Item = JournalLogEntry;
    type IntoIter = std::vec::IntoIter<JournalLogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
