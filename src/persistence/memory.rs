//! In-process message store backed by `parking_lot` locks.
//!
//! Every trait operation holds the lock for its whole duration, which makes
//! leases and update-where calls atomic with respect to each other.

use super::{default_lease_timeout, MessageRepository, ReceptionAwarenessRepository};
use crate::error::{As4Error, Result};
use crate::logging::log_database_operation;
use crate::models::{
    InException, InMessage, LeaseStatus, MessageUpdate, Operation, OutException, OutMessage,
    OutMessageFilter, ReceptionAwareness,
};
use crate::state_machine::ReceptionEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Operation an out message was leased from, and when
#[derive(Debug, Clone, Copy)]
struct OutLease {
    from: Operation,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    in_messages: Vec<InMessage>,
    out_messages: Vec<OutMessage>,
    out_leases: HashMap<String, OutLease>,
    in_exceptions: Vec<InException>,
    out_exceptions: Vec<OutException>,
    reception_awareness: Vec<ReceptionAwareness>,
}

#[derive(Debug)]
pub struct InMemoryDatastore {
    tables: Mutex<Tables>,
    lease_timeout: Duration,
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lease_timeout: default_lease_timeout(),
        }
    }
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Snapshot of all out messages, in insertion order
    pub fn out_messages(&self) -> Vec<OutMessage> {
        self.tables.lock().out_messages.clone()
    }

    /// Snapshot of all reception awareness records, in insertion order
    pub fn reception_awareness_records(&self) -> Vec<ReceptionAwareness> {
        self.tables.lock().reception_awareness.clone()
    }

    pub fn in_exception_count(&self) -> usize {
        self.tables.lock().in_exceptions.len()
    }

    pub fn out_exception_count(&self) -> usize {
        self.tables.lock().out_exceptions.len()
    }
}

fn duplicate(table: &str, id: &str) -> As4Error {
    As4Error::persistence(format!("insert {table}"), format!("duplicate key '{id}'"))
}

#[async_trait]
impl MessageRepository for InMemoryDatastore {
    async fn insert_in_message(&self, message: InMessage) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables
            .in_messages
            .iter()
            .any(|m| m.ebms_message_id == message.ebms_message_id)
        {
            return Err(duplicate("in_messages", &message.ebms_message_id));
        }
        log_database_operation(
            "insert",
            Some("in_messages"),
            Some(&message.ebms_message_id),
            "success",
            None,
        );
        tables.in_messages.push(message);
        Ok(())
    }

    async fn get_in_message(&self, ebms_message_id: &str) -> Result<Option<InMessage>> {
        Ok(self
            .tables
            .lock()
            .in_messages
            .iter()
            .find(|m| m.ebms_message_id == ebms_message_id)
            .cloned())
    }

    async fn update_in_message(
        &self,
        ebms_message_id: &str,
        update: &MessageUpdate,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        match tables
            .in_messages
            .iter_mut()
            .find(|m| m.ebms_message_id == ebms_message_id)
        {
            Some(message) => {
                update.apply_to_in(message);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_out_message(&self, message: OutMessage) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables
            .out_messages
            .iter()
            .any(|m| m.ebms_message_id == message.ebms_message_id)
        {
            return Err(duplicate("out_messages", &message.ebms_message_id));
        }
        log_database_operation(
            "insert",
            Some("out_messages"),
            Some(&message.ebms_message_id),
            "success",
            None,
        );
        tables.out_messages.push(message);
        Ok(())
    }

    async fn get_out_message(&self, ebms_message_id: &str) -> Result<Option<OutMessage>> {
        Ok(self
            .tables
            .lock()
            .out_messages
            .iter()
            .find(|m| m.ebms_message_id == ebms_message_id)
            .cloned())
    }

    async fn update_out_messages_where(
        &self,
        filter: &OutMessageFilter,
        update: &MessageUpdate,
    ) -> Result<u64> {
        let mut tables = self.tables.lock();
        let Tables {
            out_messages,
            out_leases,
            ..
        } = &mut *tables;

        let mut affected = 0;
        for message in out_messages.iter_mut().filter(|m| filter.matches(m)) {
            update.apply_to_out(message);
            if update.operation.is_some() {
                out_leases.remove(&message.ebms_message_id);
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn update_out_message_payload(
        &self,
        ebms_message_id: &str,
        url: Option<&str>,
        content_type: &str,
        content: &[u8],
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        let Some(message) = tables
            .out_messages
            .iter_mut()
            .find(|m| m.ebms_message_id == ebms_message_id)
        else {
            return Ok(false);
        };
        message.url = url.map(str::to_string);
        message.content_type = content_type.to_string();
        message.content = content.to_vec();
        Ok(true)
    }

    async fn lease_out_messages(
        &self,
        operation: Operation,
        limit: usize,
    ) -> Result<Vec<OutMessage>> {
        let Some(in_progress) = operation.in_progress() else {
            warn!(operation = %operation, "Operation cannot be leased");
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut tables = self.tables.lock();
        let Tables {
            out_messages,
            out_leases,
            ..
        } = &mut *tables;

        let expired = |message: &OutMessage| {
            message.operation == in_progress
                && out_leases
                    .get(&message.ebms_message_id)
                    .is_some_and(|l| l.from == operation && l.at + self.lease_timeout <= now)
        };
        let picked: Vec<usize> = out_messages
            .iter()
            .enumerate()
            .filter(|&(_, m)| m.operation == operation || expired(m))
            .map(|(index, _)| index)
            .take(limit)
            .collect();

        let mut leased = Vec::with_capacity(picked.len());
        for index in picked {
            let message = &mut out_messages[index];
            if message.operation == in_progress {
                debug!(
                    message_id = %message.ebms_message_id,
                    "Reclaiming expired out message lease"
                );
            }
            message.operation = in_progress;
            out_leases.insert(
                message.ebms_message_id.clone(),
                OutLease {
                    from: operation,
                    at: now,
                },
            );
            leased.push(message.clone());
        }
        Ok(leased)
    }

    async fn insert_in_exception(&self, exception: InException) -> Result<()> {
        self.tables.lock().in_exceptions.push(exception);
        Ok(())
    }

    async fn insert_out_exception(&self, exception: OutException) -> Result<()> {
        self.tables.lock().out_exceptions.push(exception);
        Ok(())
    }

    async fn get_in_exceptions(&self, ebms_ref_to_message_id: &str) -> Result<Vec<InException>> {
        Ok(self
            .tables
            .lock()
            .in_exceptions
            .iter()
            .filter(|e| e.ebms_ref_to_message_id.as_deref() == Some(ebms_ref_to_message_id))
            .cloned()
            .collect())
    }

    async fn get_out_exceptions(
        &self,
        ebms_ref_to_message_id: &str,
    ) -> Result<Vec<OutException>> {
        Ok(self
            .tables
            .lock()
            .out_exceptions
            .iter()
            .filter(|e| e.ebms_ref_to_message_id.as_deref() == Some(ebms_ref_to_message_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReceptionAwarenessRepository for InMemoryDatastore {
    async fn insert_reception_awareness(&self, record: ReceptionAwareness) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables
            .reception_awareness
            .iter()
            .any(|r| r.internal_message_id == record.internal_message_id)
        {
            return Err(duplicate("reception_awareness", &record.internal_message_id));
        }
        tables.reception_awareness.push(record);
        Ok(())
    }

    async fn get_reception_awareness(
        &self,
        internal_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>> {
        Ok(self
            .tables
            .lock()
            .reception_awareness
            .iter()
            .find(|r| r.internal_message_id == internal_message_id)
            .cloned())
    }

    async fn find_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>> {
        Ok(self
            .tables
            .lock()
            .reception_awareness
            .iter()
            .find(|r| !r.is_completed && r.ref_to_ebms_message_id == ref_to_ebms_message_id)
            .cloned())
    }

    async fn save_reception_awareness(&self, record: &ReceptionAwareness) -> Result<bool> {
        let mut tables = self.tables.lock();
        let stored = tables
            .reception_awareness
            .iter_mut()
            .find(|r| r.internal_message_id == record.internal_message_id)
            .ok_or_else(|| {
                As4Error::record_not_found("ReceptionAwareness", &record.internal_message_id)
            })?;

        if stored.is_completed {
            return Ok(false);
        }
        *stored = record.clone();
        Ok(true)
    }

    async fn lease_due_reception_awareness(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReceptionAwareness>> {
        let mut tables = self.tables.lock();
        let mut leased = Vec::new();
        for record in tables.reception_awareness.iter_mut() {
            if leased.len() >= limit {
                break;
            }
            if !record.is_leasable(now, self.lease_timeout) {
                continue;
            }
            match record.is_due(now) {
                Ok(true) => {
                    if record.lease == LeaseStatus::Busy {
                        debug!(
                            internal_message_id = %record.internal_message_id,
                            "Reclaiming expired reception awareness lease"
                        );
                    }
                    record.take_lease(now);
                    leased.push(record.clone());
                }
                Ok(false) => {}
                Err(e) => warn!(
                    internal_message_id = %record.internal_message_id,
                    error = %e,
                    "Skipping reception awareness record with invalid retry interval"
                ),
            }
        }
        Ok(leased)
    }

    async fn release_reception_awareness(&self, internal_message_ids: &[String]) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mut released = 0;
        for record in tables.reception_awareness.iter_mut().filter(|r| {
            r.lease == LeaseStatus::Busy && internal_message_ids.contains(&r.internal_message_id)
        }) {
            record.release_lease();
            released += 1;
        }
        Ok(released)
    }

    async fn complete_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
        event: ReceptionEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ReceptionAwareness>> {
        let mut tables = self.tables.lock();
        let record = tables
            .reception_awareness
            .iter_mut()
            .find(|r| !r.is_completed && r.ref_to_ebms_message_id == ref_to_ebms_message_id);

        Ok(record.and_then(|record| {
            record.complete_out_of_band(event, now)?;
            Some(record.clone())
        }))
    }
}
