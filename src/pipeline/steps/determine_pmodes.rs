//! Resolve the receiving PMode of an inbound user message.

use super::DETERMINE_PMODES;
use crate::error::{As4Error, Result};
use crate::matching::PModeMatcher;
use crate::models::{ErrorCode, ErrorResult, MessagingContext};
use crate::pipeline::step::{Step, StepResult};
use crate::pmode::PModeStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DeterminePModesStep {
    pmode_store: Arc<dyn PModeStore>,
    matcher: Arc<PModeMatcher>,
}

impl DeterminePModesStep {
    pub fn new(pmode_store: Arc<dyn PModeStore>, matcher: Arc<PModeMatcher>) -> Self {
        Self {
            pmode_store,
            matcher,
        }
    }
}

#[async_trait]
impl Step for DeterminePModesStep {
    fn name(&self) -> &str {
        DETERMINE_PMODES
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        let message = context
            .as4_message()
            .ok_or_else(|| As4Error::step_execution(DETERMINE_PMODES, "context has no AS4 message"))?;

        // Signals are correlated by reference, they need no receiving PMode
        let Some(user_message) = message.primary_user_message() else {
            return Ok(StepResult::success(context));
        };

        if context.receiving_pmode.is_some() {
            debug!(
                message_id = %user_message.message_id,
                "Receiving PMode already determined"
            );
            return Ok(StepResult::success(context));
        }

        let candidates = self.pmode_store.receiving_pmodes().await?;
        let best = self
            .matcher
            .find_best_match(&candidates, user_message)
            .map(|m| (m.pmode.clone(), m.score));

        match best {
            Some((pmode, score)) => {
                debug!(
                    message_id = %user_message.message_id,
                    pmode_id = %pmode.id,
                    score = score,
                    "Receiving PMode matched"
                );
                let entry = format!("Receiving PMode '{}' matched with score {score}", pmode.id);
                Ok(StepResult::success(context.with_receiving_pmode(pmode)).with_journal_entry(entry))
            }
            None => {
                let description = format!(
                    "No receiving PMode matches user message '{}'",
                    user_message.message_id
                );
                warn!(message_id = %user_message.message_id, candidates = candidates.len(), "{description}");
                let context = context.with_error_result(ErrorResult::new(
                    ErrorCode::ProcessingModeMismatch,
                    description.clone(),
                ));
                Ok(StepResult::failed(context).with_journal_entry(description))
            }
        }
    }
}
