//! Receiver picking up stored out messages.
//!
//! Rows in the configured operation (for example `ToBeSent`) are leased by
//! switching them to the matching in-progress operation. Leased rows that
//! were not handed to the agent when polling stops are put back.

use super::polling::PollingTemplate;
use super::MessageCallback;
use crate::error::{As4Error, Result};
use crate::models::{
    MessageOrigin, MessageStatus, MessageUpdate, Operation, OutMessage, OutMessageFilter,
    ReceivedMessage,
};
use crate::persistence::MessageRepository;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DatastoreReceiver {
    name: String,
    repository: Arc<dyn MessageRepository>,
    operation: Operation,
    batch_size: usize,
    polling_interval: Duration,
    max_concurrency: Option<usize>,
    pending: Mutex<HashSet<String>>,
}

impl DatastoreReceiver {
    /// Fails for operations that have no in-progress counterpart to lease with
    pub fn new(
        name: impl Into<String>,
        repository: Arc<dyn MessageRepository>,
        operation: Operation,
    ) -> Result<Self> {
        if operation.in_progress().is_none() {
            return Err(As4Error::Configuration(format!(
                "operation '{operation}' cannot be polled"
            )));
        }
        Ok(Self {
            name: name.into(),
            repository,
            operation,
            batch_size: 20,
            polling_interval: Duration::from_secs(1),
            max_concurrency: None,
            pending: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    fn received_message(message: &OutMessage) -> ReceivedMessage {
        ReceivedMessage::new(message.content.clone(), message.content_type.clone()).with_origin(
            MessageOrigin::Datastore {
                ebms_message_id: message.ebms_message_id.clone(),
                pmode_id: message.pmode_id.clone(),
            },
        )
    }
}

#[async_trait]
impl PollingTemplate for DatastoreReceiver {
    type Item = OutMessage;
    type Callback = MessageCallback;

    fn name(&self) -> &str {
        &self.name
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    async fn get_messages_to_poll(&self) -> Result<Vec<OutMessage>> {
        let leased = self
            .repository
            .lease_out_messages(self.operation, self.batch_size)
            .await?;

        if !leased.is_empty() {
            let mut pending = self.pending.lock();
            pending.extend(leased.iter().map(|m| m.ebms_message_id.clone()));
            debug!(receiver = %self.name, leased = leased.len(), "Leased out messages");
        }
        Ok(leased)
    }

    async fn message_received(&self, item: OutMessage, callback: MessageCallback) -> Result<()> {
        self.pending.lock().remove(&item.ebms_message_id);
        let context = callback(Self::received_message(&item)).await;

        if let Some(error) = context.exception {
            debug!(
                receiver = %self.name,
                message_id = %item.ebms_message_id,
                error = %error,
                "Out message handled with exception"
            );
        }
        Ok(())
    }

    async fn handle_message_exception(&self, item: &OutMessage, error: &As4Error) {
        self.pending.lock().remove(&item.ebms_message_id);
        warn!(
            receiver = %self.name,
            message_id = %item.ebms_message_id,
            error = %error,
            "Dead-lettering out message after processing failure"
        );

        let update = MessageUpdate::new(Operation::DeadLettered, MessageStatus::Exception);
        if let Err(e) = self
            .repository
            .update_out_messages_where(&OutMessageFilter::by_id(&item.ebms_message_id), &update)
            .await
        {
            warn!(message_id = %item.ebms_message_id, error = %e, "Could not dead-letter out message");
        }
    }

    async fn release_pending_items(&self) -> Result<()> {
        let ids: Vec<String> = self.pending.lock().drain().collect();
        let Some(in_progress) = self.operation.in_progress() else {
            return Ok(());
        };
        if ids.is_empty() {
            return Ok(());
        }

        // Only rows still in the lease state go back; processed rows moved on
        let filter = OutMessageFilter {
            ebms_message_ids: Some(ids),
            operation: Some(in_progress),
        };
        let released = self
            .repository
            .update_out_messages_where(&filter, &MessageUpdate::operation(self.operation))
            .await?;
        info!(receiver = %self.name, released = released, "Released leased out messages");
        Ok(())
    }
}
