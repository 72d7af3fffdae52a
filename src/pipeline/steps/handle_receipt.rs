//! Correlate inbound receipts and error signals with the messages we sent.
//!
//! A receipt acknowledges the referenced out message and completes its
//! reception awareness record as Delivered. An error signal negatively
//! acknowledges it and completes the record as Rejected. Either way no
//! further retries happen. EBMS:0006 warnings answer pull requests and carry
//! no correlation.

use super::HANDLE_RECEIPT;
use crate::error::{As4Error, Result};
use crate::models::{MessageStatus, MessageUpdate, MessagingContext, OutMessageFilter, SignalMessage};
use crate::persistence::{MessageRepository, ReceptionAwarenessRepository};
use crate::pipeline::step::{Step, StepResult};
use crate::state_machine::ReceptionEvent;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct HandleReceiptStep {
    messages: Arc<dyn MessageRepository>,
    reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
}

impl HandleReceiptStep {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
    ) -> Self {
        Self {
            messages,
            reception_awareness,
        }
    }

    async fn correlate(&self, ref_to: &str, event: ReceptionEvent) -> Result<String> {
        let status = match event {
            ReceptionEvent::ErrorReceived => MessageStatus::Nack,
            _ => MessageStatus::Ack,
        };
        let updated = self
            .messages
            .update_out_messages_where(&OutMessageFilter::by_id(ref_to), &MessageUpdate::status(status))
            .await?;
        let completed = self
            .reception_awareness
            .complete_for_ebms_message(ref_to, event, Utc::now())
            .await?;

        info!(
            ref_to_message_id = %ref_to,
            status = %status,
            out_messages = updated,
            reception_awareness = ?completed.as_ref().map(|r| r.state),
            "Correlated signal with sent message"
        );
        Ok(format!("Out message '{ref_to}' marked {status}"))
    }
}

#[async_trait]
impl Step for HandleReceiptStep {
    fn name(&self) -> &str {
        HANDLE_RECEIPT
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let message = context
            .as4_message()
            .ok_or_else(|| As4Error::step_execution(HANDLE_RECEIPT, "context has no AS4 message"))?;

        let mut entries = Vec::new();
        for signal in message.signal_messages() {
            match signal {
                SignalMessage::Receipt(receipt) => {
                    let entry = self
                        .correlate(&receipt.ref_to_message_id, ReceptionEvent::ResponseReceived)
                        .await?;
                    entries.push(entry);
                }
                SignalMessage::Error(error) if error.is_empty_mpc_warning() => {
                    debug!(message_id = %error.message_id, "Empty MPC warning, nothing to correlate");
                }
                SignalMessage::Error(error) => match error.ref_to_message_id.as_deref() {
                    Some(ref_to) => entries.push(self.correlate(ref_to, ReceptionEvent::ErrorReceived).await?),
                    None => debug!(message_id = %error.message_id, "Error signal without reference"),
                },
                SignalMessage::PullRequest(_) => {}
            }
        }

        Ok(entries
            .into_iter()
            .fold(StepResult::success(context), |result, entry| {
                result.with_journal_entry(entry)
            }))
    }
}
