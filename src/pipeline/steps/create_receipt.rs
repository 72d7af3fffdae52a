//! Answer a received user message with a receipt.
//!
//! The receipt replaces the user message on the context, so steps running
//! afterwards (and their journal entries) work on the receipt identity.

use super::CREATE_RECEIPT;
use crate::error::Result;
use crate::ids::IdentifierGenerator;
use crate::models::{As4Message, MessagingContext, Receipt, SignalMessage};
use crate::pipeline::step::{Step, StepResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

pub struct CreateReceiptStep {
    id_generator: Arc<dyn IdentifierGenerator>,
}

impl CreateReceiptStep {
    pub fn new(id_generator: Arc<dyn IdentifierGenerator>) -> Self {
        Self { id_generator }
    }
}

#[async_trait]
impl Step for CreateReceiptStep {
    fn name(&self) -> &str {
        CREATE_RECEIPT
    }

    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult> {
        let Some(user_message_id) = context
            .as4_message()
            .and_then(As4Message::primary_user_message)
            .map(|u| u.message_id.clone())
        else {
            return Ok(StepResult::success(context));
        };

        let send_receipt = context
            .receiving_pmode
            .as_ref()
            .map_or(true, |p| p.reply_handling.send_receipt);
        if !send_receipt {
            debug!(message_id = %user_message_id, "Receipts disabled by receiving PMode");
            return Ok(StepResult::success(context));
        }

        let receipt_id = self.id_generator.generate();
        let journal = StepResult::success(context.clone())
            .with_journal_entry(format!("Receipt '{receipt_id}' created"))
            .journal;

        context.replace_message(As4Message::for_signal(SignalMessage::Receipt(Receipt {
            message_id: receipt_id,
            ref_to_message_id: user_message_id.clone(),
            timestamp: Utc::now(),
        })));

        Ok(StepResult::success(context)
            .with_journal(journal)
            .with_journal_entry(format!("Receipt for user message '{user_message_id}'")))
    }
}
