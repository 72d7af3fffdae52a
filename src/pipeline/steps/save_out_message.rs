//! Persist the message currently on the context as an out message.
//!
//! User messages are queued for sending; signals (receipts and errors that
//! answer a received message) are stored for bookkeeping only.

use super::save_received_message::message_kind;
use super::SAVE_OUT_MESSAGE;
use crate::error::{As4Error, Result};
use crate::models::{MessageKind, MessageStatus, MessagingContext, Operation, OutMessage};
use crate::persistence::MessageRepository;
use crate::pipeline::step::{Step, StepResult};
use crate::transformers::As4Codec;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub struct SaveOutMessageStep {
    repository: Arc<dyn MessageRepository>,
    codec: Arc<dyn As4Codec>,
}

impl SaveOutMessageStep {
    pub fn new(repository: Arc<dyn MessageRepository>, codec: Arc<dyn As4Codec>) -> Self {
        Self { repository, codec }
    }
}

#[async_trait]
impl Step for SaveOutMessageStep {
    fn name(&self) -> &str {
        SAVE_OUT_MESSAGE
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let message = context
            .as4_message()
            .ok_or_else(|| As4Error::step_execution(SAVE_OUT_MESSAGE, "context has no AS4 message"))?;
        let unit = message
            .primary_message_unit()
            .ok_or_else(|| As4Error::step_execution(SAVE_OUT_MESSAGE, "message has no message unit"))?;

        let kind = message_kind(unit);
        let operation = if kind == MessageKind::UserMessage {
            Operation::ToBeSent
        } else {
            Operation::NotApplicable
        };
        let pmode_id = context
            .sending_pmode
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| context.receiving_pmode.as_ref().map(|p| p.id.clone()));
        let url = context
            .sending_pmode
            .as_ref()
            .and_then(|p| p.push_configuration.as_ref())
            .map(|push| push.url.clone());

        self.repository
            .insert_out_message(OutMessage {
                ebms_message_id: unit.message_id().to_string(),
                ref_to_ebms_message_id: unit.ref_to_message_id().map(str::to_string),
                kind,
                pmode_id,
                url,
                content_type: self.codec.content_type().to_string(),
                content: self.codec.encode(message)?,
                operation,
                status: MessageStatus::Created,
                inserted_at: Utc::now(),
            })
            .await?;

        Ok(StepResult::success(context).with_journal_entry(format!("Stored as out message ({operation})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{As4Message, ProcessingMode, Receipt, SignalMessage, UserMessage};
    use crate::persistence::InMemoryDatastore;
    use crate::transformers::JsonAs4Codec;

    #[tokio::test]
    async fn test_user_message_is_queued_and_signal_is_not() {
        let store = Arc::new(InMemoryDatastore::new());
        let step = SaveOutMessageStep::new(store.clone(), Arc::new(JsonAs4Codec));

        let user = MessagingContext::from_message(
            As4Message::for_user_message(UserMessage::new("out-1")),
            ProcessingMode::Submit,
        );
        let receipt = MessagingContext::from_message(
            As4Message::for_signal(SignalMessage::Receipt(Receipt {
                message_id: "receipt-1".to_string(),
                ref_to_message_id: "in-1".to_string(),
                timestamp: Utc::now(),
            })),
            ProcessingMode::Receive,
        );
        step.execute(user).await.unwrap();
        step.execute(receipt).await.unwrap();

        let out = store.get_out_message("out-1").await.unwrap().unwrap();
        assert_eq!(out.operation, Operation::ToBeSent);
        let stored = JsonAs4Codec.decode(&out.content, &out.content_type).unwrap();
        assert_eq!(stored.primary_message_id(), Some("out-1"));

        let receipt = store.get_out_message("receipt-1").await.unwrap().unwrap();
        assert_eq!(receipt.operation, Operation::NotApplicable);
        assert_eq!(receipt.ref_to_ebms_message_id.as_deref(), Some("in-1"));
    }
}
