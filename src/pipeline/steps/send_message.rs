//! # Send Message Step
//!
//! Pushes the context's message to the remote MSH through the
//! [`MessageSender`] and records the attempt:
//!
//! - with an open reception awareness record the send result drives the
//!   retry state machine and the out message gets the operation and status
//!   of the resulting transition;
//! - without one, success marks the out message Sent and any failure
//!   dead-letters it.
//!
//! Before the attempt the encoded (and possibly signed) message and the
//! resolved endpoint are written back to the out message; the retry engine
//! resends that row as is.
//!
//! A response the codec understands (a receipt, an error signal or, for pull
//! requests, the pulled user message) replaces the message on the context.

use super::SEND_MESSAGE;
use crate::error::{As4Error, Result};
use crate::logging::log_retry_operation;
use crate::models::{
    ErrorCode, ErrorResult, MessageStatus, MessageUpdate, MessagingContext, Operation,
    OutMessageFilter, ProcessingMode,
};
use crate::persistence::{MessageRepository, ReceptionAwarenessRepository};
use crate::pipeline::step::{Step, StepResult};
use crate::state_machine::SendResult;
use crate::transformers::As4Codec;
use crate::transport::{MessageSender, OutboundMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SendMessageStep {
    sender: Arc<dyn MessageSender>,
    codec: Arc<dyn As4Codec>,
    messages: Arc<dyn MessageRepository>,
    reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
}

/// How the attempt ended for the out message
enum Disposition {
    Sent,
    RetryScheduled,
    Failed,
}

impl SendMessageStep {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        codec: Arc<dyn As4Codec>,
        messages: Arc<dyn MessageRepository>,
        reception_awareness: Arc<dyn ReceptionAwarenessRepository>,
    ) -> Self {
        Self {
            sender,
            codec,
            messages,
            reception_awareness,
        }
    }

    async fn record_attempt(&self, ebms_message_id: &str, result: SendResult) -> Result<Disposition> {
        let record = self
            .reception_awareness
            .find_for_ebms_message(ebms_message_id)
            .await?;

        let (update, disposition) = match record {
            Some(mut record) => {
                let transition = record.apply_send_result(result, Utc::now())?;
                log_retry_operation(
                    "send",
                    &record.internal_message_id,
                    Some(ebms_message_id),
                    record.current_retry_count,
                    record.total_retry_count,
                    &record.state.to_string(),
                );
                if !self.reception_awareness.save_reception_awareness(&record).await? {
                    debug!(
                        internal_message_id = %record.internal_message_id,
                        "Reception awareness completed concurrently, out message left as is"
                    );
                    return Ok(Disposition::Sent);
                }

                let disposition = if transition.retry_scheduled {
                    Disposition::RetryScheduled
                } else if result.is_success() {
                    Disposition::Sent
                } else {
                    Disposition::Failed
                };
                (
                    MessageUpdate::new(transition.operation, transition.status),
                    disposition,
                )
            }
            None if result.is_success() => (
                MessageUpdate::new(Operation::Sent, MessageStatus::Sent),
                Disposition::Sent,
            ),
            None => (
                MessageUpdate::new(Operation::DeadLettered, MessageStatus::Exception),
                Disposition::Failed,
            ),
        };

        self.messages
            .update_out_messages_where(&OutMessageFilter::by_id(ebms_message_id), &update)
            .await?;
        Ok(disposition)
    }
}

#[async_trait]
impl Step for SendMessageStep {
    fn name(&self) -> &str {
        SEND_MESSAGE
    }

    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult> {
        let message = context
            .as4_message()
            .ok_or_else(|| As4Error::step_execution(SEND_MESSAGE, "context has no AS4 message"))?;
        let ebms_message_id = message
            .primary_message_id()
            .ok_or_else(|| As4Error::step_execution(SEND_MESSAGE, "message has no message unit"))?
            .to_string();
        let is_pull_request = message.is_pull_request();

        let url = context
            .sending_pmode
            .as_ref()
            .and_then(|p| p.push_configuration.as_ref())
            .map(|push| push.url.clone());
        let outbound = OutboundMessage {
            ebms_message_id: ebms_message_id.clone(),
            url: url.clone(),
            content_type: self.codec.content_type().to_string(),
            content: self.codec.encode(message)?,
        };

        // retries replay the stored row, so it must hold exactly what goes out
        if !is_pull_request {
            let stored = self
                .messages
                .update_out_message_payload(
                    &ebms_message_id,
                    outbound.url.as_deref(),
                    &outbound.content_type,
                    &outbound.content,
                )
                .await?;
            if !stored {
                debug!(message_id = %ebms_message_id, "No out message row for the sent message");
            }
        }

        let outcome = self.sender.send_and_receive(&outbound).await;
        let disposition = self.record_attempt(&ebms_message_id, outcome.result).await?;

        let sent_entry = format!(
            "Sent to {}: {:?}",
            url.as_deref().unwrap_or("<default endpoint>"),
            outcome.result
        );
        let mut journal = StepResult::success(context.clone())
            .with_journal_entry(sent_entry)
            .journal;

        if let Some(response) = outcome.response {
            match self.codec.decode(&response.content, &response.content_type) {
                Ok(response_message) if !response_message.message_units.is_empty() => {
                    context.replace_message(response_message);
                    if is_pull_request {
                        context.mode = ProcessingMode::PullReceive;
                    }
                    journal = StepResult::success(context.clone())
                        .with_journal(journal)
                        .with_journal_entry(format!("Response to '{ebms_message_id}'"))
                        .journal;
                }
                Ok(_) => debug!(message_id = %ebms_message_id, "Empty response body"),
                Err(e) => warn!(
                    message_id = %ebms_message_id,
                    error = %e,
                    "Response could not be decoded, ignoring it"
                ),
            }
        }

        let result = match disposition {
            Disposition::Sent => StepResult::success(context),
            Disposition::RetryScheduled => StepResult::success(context).and_stop_execution(),
            Disposition::Failed => StepResult::failed(context.with_error_result(ErrorResult::new(
                ErrorCode::DeliveryFailure,
                format!("Delivery of '{ebms_message_id}' failed: {:?}", outcome.result),
            ))),
        };
        Ok(result.with_journal(journal))
    }
}
