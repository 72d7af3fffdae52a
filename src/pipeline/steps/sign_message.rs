//! Sign outbound messages when the sending PMode asks for it.

use super::SIGN_MESSAGE;
use crate::error::{As4Error, Result};
use crate::models::MessagingContext;
use crate::pipeline::step::{Step, StepResult};
use crate::security::{sign_message, MessageSigner};
use async_trait::async_trait;
use std::sync::Arc;

pub struct SignMessageStep {
    signer: Option<Arc<dyn MessageSigner>>,
}

impl SignMessageStep {
    pub fn new(signer: Option<Arc<dyn MessageSigner>>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl Step for SignMessageStep {
    fn name(&self) -> &str {
        SIGN_MESSAGE
    }

    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult> {
        let Some(algorithm) = context
            .sending_pmode
            .as_ref()
            .filter(|p| p.signing.is_enabled)
            .map(|p| p.signing.algorithm.clone())
        else {
            return Ok(StepResult::success(context));
        };

        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| As4Error::Security("no message signer configured".to_string()))?;
        let message = context
            .as4_message_mut()
            .ok_or_else(|| As4Error::step_execution(SIGN_MESSAGE, "context has no AS4 message"))?;

        sign_message(message, signer.as_ref(), &algorithm)?;
        Ok(StepResult::success(context).with_journal_entry(format!("Message signed with {algorithm}")))
    }
}
