//! Error pipeline step: turn the recorded [`ErrorResult`] into an ebMS error signal.

use super::CREATE_ERROR;
use crate::error::Result;
use crate::ids::IdentifierGenerator;
use crate::models::{
    As4Message, ErrorCode, ErrorDetail, ErrorResult, ErrorSignal, MessagingContext, SignalMessage,
};
use crate::pipeline::step::{Step, StepResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct CreateErrorStep {
    id_generator: Arc<dyn IdentifierGenerator>,
}

impl CreateErrorStep {
    pub fn new(id_generator: Arc<dyn IdentifierGenerator>) -> Self {
        Self { id_generator }
    }
}

#[async_trait]
impl Step for CreateErrorStep {
    fn name(&self) -> &str {
        CREATE_ERROR
    }

    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult> {
        let error_result = context
            .error_result
            .clone()
            .unwrap_or_else(|| ErrorResult::new(ErrorCode::Other, "Message processing failed"));
        let ref_to = context.ebms_message_id().map(str::to_string);
        let error_id = self.id_generator.generate();

        info!(
            error_message_id = %error_id,
            ref_to_message_id = ref_to.as_deref(),
            code = error_result.code.code(),
            "Creating ebMS error signal"
        );

        let journal = StepResult::success(context.clone())
            .with_journal_entry(format!(
                "Error signal '{error_id}' created: {}",
                error_result.code
            ))
            .journal;

        context.replace_message(As4Message::for_signal(SignalMessage::Error(ErrorSignal {
            message_id: error_id,
            ref_to_message_id: ref_to,
            timestamp: Utc::now(),
            errors: vec![ErrorDetail {
                code: error_result.code,
                severity: error_result.code.severity(),
                detail: error_result.description.clone(),
            }],
        })));

        Ok(StepResult::success(context)
            .with_journal(journal)
            .with_journal_entry(error_result.description))
    }
}
