//! Persist every message unit of a received message as an in message.

use super::SAVE_RECEIVED_MESSAGE;
use crate::error::{As4Error, Result};
use crate::models::{
    InMessage, MessageKind, MessageStatus, MessageUnit, MessagingContext, Operation, SignalMessage,
};
use crate::persistence::MessageRepository;
use crate::pipeline::step::{Step, StepResult};
use crate::transformers::As4Codec;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub struct SaveReceivedMessageStep {
    repository: Arc<dyn MessageRepository>,
    codec: Arc<dyn As4Codec>,
}

impl SaveReceivedMessageStep {
    pub fn new(repository: Arc<dyn MessageRepository>, codec: Arc<dyn As4Codec>) -> Self {
        Self { repository, codec }
    }
}

pub(crate) fn message_kind(unit: &MessageUnit) -> MessageKind {
    match unit {
        MessageUnit::User(_) => MessageKind::UserMessage,
        MessageUnit::Signal(SignalMessage::Receipt(_)) => MessageKind::Receipt,
        MessageUnit::Signal(SignalMessage::Error(_)) => MessageKind::Error,
        MessageUnit::Signal(SignalMessage::PullRequest(_)) => MessageKind::PullRequest,
    }
}

#[async_trait]
impl Step for SaveReceivedMessageStep {
    fn name(&self) -> &str {
        SAVE_RECEIVED_MESSAGE
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let message = context.as4_message().ok_or_else(|| {
            As4Error::step_execution(SAVE_RECEIVED_MESSAGE, "context has no AS4 message")
        })?;

        // Keep the bytes as received; re-encode only when the raw form is gone
        let (content_type, content) = match context.received_message() {
            Some(received) => (received.content_type.clone(), received.content.clone()),
            None => (
                self.codec.content_type().to_string(),
                self.codec.encode(message)?,
            ),
        };

        let pmode = context.receiving_pmode.as_ref();
        let deliver = pmode.is_some_and(|p| p.delivery.is_enabled);
        let now = Utc::now();

        for unit in &message.message_units {
            let kind = message_kind(unit);
            let operation = if kind == MessageKind::UserMessage && deliver {
                Operation::ToBeDelivered
            } else {
                Operation::NotApplicable
            };

            self.repository
                .insert_in_message(InMessage {
                    ebms_message_id: unit.message_id().to_string(),
                    ref_to_ebms_message_id: unit.ref_to_message_id().map(str::to_string),
                    kind,
                    pmode_id: pmode.map(|p| p.id.clone()),
                    content_type: content_type.clone(),
                    content: content.clone(),
                    operation,
                    status: MessageStatus::Received,
                    inserted_at: now,
                })
                .await?;
        }

        let units = message.message_units.len();
        Ok(StepResult::success(context).with_journal_entry(format!("Saved {units} received message unit(s)")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{As4Message, ProcessingMode, ReceivingPMode, UserMessage};
    use crate::persistence::InMemoryDatastore;
    use crate::transformers::JsonAs4Codec;

    #[tokio::test]
    async fn test_user_message_is_stored_for_delivery() {
        let store = Arc::new(InMemoryDatastore::new());
        let step = SaveReceivedMessageStep::new(store.clone(), Arc::new(JsonAs4Codec));

        let mut pmode = ReceivingPMode::new("receive");
        pmode.delivery.is_enabled = true;
        let context = MessagingContext::from_message(
            As4Message::for_user_message(UserMessage::new("user-1")),
            ProcessingMode::Receive,
        )
        .with_receiving_pmode(pmode);

        step.execute(context).await.unwrap();

        let stored = store.get_in_message("user-1").await.unwrap().unwrap();
        assert_eq!(stored.operation, Operation::ToBeDelivered);
        assert_eq!(stored.status, MessageStatus::Received);
        assert_eq!(stored.pmode_id.as_deref(), Some("receive"));
    }

    #[tokio::test]
    async fn test_duplicate_message_is_an_error() {
        let store = Arc::new(InMemoryDatastore::new());
        let step = SaveReceivedMessageStep::new(store, Arc::new(JsonAs4Codec));
        let context = MessagingContext::from_message(
            As4Message::for_user_message(UserMessage::new("user-1")),
            ProcessingMode::Receive,
        );

        step.execute(context.clone()).await.unwrap();
        assert!(step.execute(context).await.is_err());
    }
}
