//! # Reception Awareness Retry Engine
//!
//! Polls for reception awareness records that are due, re-sends the stored
//! out message and feeds the send result into the reliability state machine.
//!
//! Exclusivity per record comes from two layers: the repository lease
//! (Pending -> Busy, taken atomically when records are fetched) and an
//! in-process guard keyed by `internal_message_id` for engines sharing one
//! repository inside the same process.

use crate::error::{As4Error, Result};
use crate::logging::{log_error, log_retry_operation};
use crate::models::{MessageUpdate, OutMessageFilter, ReceptionAwareness};
use crate::persistence::{MessageRepository, ReceptionAwarenessRepository};
use crate::receivers::polling::{start_polling, PollingTemplate};
use crate::state_machine::{SendResult, Transition};
use crate::transport::{MessageSender, OutboundMessage};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Removes the in-flight marker when processing ends, including by panic
struct InFlight<'a> {
    in_flight: &'a DashMap<String, ()>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

pub struct ReceptionAwarenessAgent {
    reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
    messages: Arc<dyn MessageRepository>,
    sender: Arc<dyn MessageSender>,
    polling_interval: Duration,
    batch_size: usize,
    max_concurrency: Option<usize>,
    in_flight: DashMap<String, ()>,
    leased: Mutex<HashSet<String>>,
}

impl ReceptionAwarenessAgent {
    pub fn new(
        reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
        messages: Arc<dyn MessageRepository>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            reception_awareness,
            messages,
            sender,
            polling_interval: Duration::from_secs(5),
            batch_size: 50,
            max_concurrency: None,
            in_flight: DashMap::new(),
            leased: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Poll until `cancellation` fires, then release outstanding leases
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        start_polling(self, (), cancellation).await;
    }

    async fn process(&self, mut record: ReceptionAwareness) -> Result<()> {
        let now = Utc::now();

        if record.retries_exhausted() {
            let transition = record.dead_letter_exhausted(now)?;
            return self.persist("dead_letter", &record, transition).await;
        }

        let Some(out_message) = self
            .messages
            .get_out_message(&record.ref_to_ebms_message_id)
            .await?
        else {
            warn!(
                internal_message_id = %record.internal_message_id,
                ebms_message_id = %record.ref_to_ebms_message_id,
                "Out message for reception awareness record is gone, dead-lettering"
            );
            let transition = record.apply_send_result(SendResult::FatalFail, now)?;
            return self.persist("dead_letter", &record, transition).await;
        };

        let result = self.sender.send(&OutboundMessage::from(&out_message)).await;
        let transition = record.apply_send_result(result, Utc::now())?;
        self.persist("resend", &record, transition).await
    }

    async fn persist(
        &self,
        operation: &str,
        record: &ReceptionAwareness,
        transition: Transition,
    ) -> Result<()> {
        if !self.reception_awareness.save_reception_awareness(record).await? {
            debug!(
                internal_message_id = %record.internal_message_id,
                "Record completed concurrently, keeping the stored outcome"
            );
            return Ok(());
        }

        self.messages
            .update_out_messages_where(
                &OutMessageFilter::by_id(&record.ref_to_ebms_message_id),
                &MessageUpdate::new(transition.operation, transition.status),
            )
            .await?;

        log_retry_operation(
            operation,
            &record.internal_message_id,
            Some(&record.ref_to_ebms_message_id),
            record.current_retry_count,
            record.total_retry_count,
            &transition.to.to_string(),
        );
        Ok(())
    }

    async fn release(&self, ids: Vec<String>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.reception_awareness.release_reception_awareness(&ids).await
    }
}

#[async_trait]
impl PollingTemplate for ReceptionAwarenessAgent {
    type Item = ReceptionAwareness;
    type Callback = ();

    fn name(&self) -> &str {
        "reception_awareness"
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    async fn get_messages_to_poll(&self) -> Result<Vec<ReceptionAwareness>> {
        let leased = self
            .reception_awareness
            .lease_due_reception_awareness(Utc::now(), self.batch_size)
            .await?;

        let mut due = Vec::with_capacity(leased.len());
        let mut skipped = Vec::new();
        {
            let mut held = self.leased.lock();
            for record in leased {
                if self.in_flight.contains_key(&record.internal_message_id) {
                    skipped.push(record.internal_message_id);
                } else {
                    held.insert(record.internal_message_id.clone());
                    due.push(record);
                }
            }
        }

        if !skipped.is_empty() {
            debug!(skipped = skipped.len(), "Records already in flight, releasing leases");
            self.release(skipped).await?;
        }
        Ok(due)
    }

    async fn message_received(&self, item: ReceptionAwareness, _callback: ()) -> Result<()> {
        let id = item.internal_message_id.clone();
        if self.in_flight.insert(id.clone(), ()).is_some() {
            return Err(As4Error::Internal(format!(
                "reception awareness record '{id}' is already being processed"
            )));
        }
        let _in_flight = InFlight {
            in_flight: &self.in_flight,
            id: id.clone(),
        };

        let processed = self.process(item).await;
        self.leased.lock().remove(&id);
        processed
    }

    async fn handle_message_exception(&self, item: &ReceptionAwareness, error: &As4Error) {
        log_error(
            "reception_awareness",
            "retry",
            &error.to_string(),
            Some(&item.internal_message_id),
        );
        self.leased.lock().remove(&item.internal_message_id);
        if let Err(e) = self.release(vec![item.internal_message_id.clone()]).await {
            warn!(internal_message_id = %item.internal_message_id, error = %e, "Could not release lease");
        }
    }

    async fn release_pending_items(&self) -> Result<()> {
        let ids: Vec<String> = self.leased.lock().drain().collect();
        let released = self.release(ids).await?;
        info!(released = released, "Released reception awareness leases");
        Ok(())
    }
}
