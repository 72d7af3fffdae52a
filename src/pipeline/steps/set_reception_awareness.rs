//! Start reception awareness bookkeeping for an outbound user message.

use super::SET_RECEPTION_AWARENESS;
use crate::error::Result;
use crate::ids::IdentifierGenerator;
use crate::logging::log_retry_operation;
use crate::models::{As4Message, MessagingContext, ReceptionAwareness};
use crate::persistence::ReceptionAwarenessRepository;
use crate::pipeline::step::{Step, StepResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub struct SetReceptionAwarenessStep {
    repository: Arc<dyn ReceptionAwarenessRepository>,
    id_generator: Arc<dyn IdentifierGenerator>,
}

impl SetReceptionAwarenessStep {
    pub fn new(
        repository: Arc<dyn ReceptionAwarenessRepository>,
        id_generator: Arc<dyn IdentifierGenerator>,
    ) -> Self {
        Self {
            repository,
            id_generator,
        }
    }
}

#[async_trait]
impl Step for SetReceptionAwarenessStep {
    fn name(&self) -> &str {
        SET_RECEPTION_AWARENESS
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let Some(settings) = context
            .sending_pmode
            .as_ref()
            .map(|p| &p.reception_awareness)
            .filter(|s| s.is_enabled)
        else {
            return Ok(StepResult::success(context));
        };
        let Some(ebms_message_id) = context
            .as4_message()
            .and_then(As4Message::primary_user_message)
            .map(|u| u.message_id.as_str())
        else {
            return Ok(StepResult::success(context));
        };

        // Redelivered out messages keep their original record
        if self
            .repository
            .find_for_ebms_message(ebms_message_id)
            .await?
            .is_some()
        {
            return Ok(StepResult::success(context));
        }

        // Validate the interval before persisting anything that depends on it
        crate::models::records::parse_retry_interval(&settings.retry_interval)?;

        let record = ReceptionAwareness::new(
            self.id_generator.generate(),
            ebms_message_id,
            settings.retry_count,
            settings.retry_interval.clone(),
            Utc::now(),
        );
        log_retry_operation(
            "register",
            &record.internal_message_id,
            Some(ebms_message_id),
            record.current_retry_count,
            record.total_retry_count,
            "pending",
        );
        self.repository.insert_reception_awareness(record).await?;

        Ok(StepResult::success(context).with_journal_entry("Reception awareness enabled"))
    }
}
