//! # Step Abstraction
//!
//! A step is a named unit of work over a [`MessagingContext`]. Steps signal
//! deliberate failure through [`StepOutcome::StopFailure`]; returning `Err`
//! is reserved for unplanned failures that the agent's exception handler
//! takes care of.

use crate::error::Result;
use crate::models::{Journal, JournalLogEntry, MessagingContext};
use async_trait::async_trait;

/// What the executor should do after a step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Run the next step
    Continue,
    /// Stop the current pipeline, the run succeeded
    StopSuccess,
    /// Stop the normal pipeline and switch to the error pipeline
    StopFailure,
}

/// Result of executing a step or a whole pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub context: MessagingContext,
    pub outcome: StepOutcome,
    pub journal: Journal,
}

impl StepResult {
    pub fn success(context: MessagingContext) -> Self {
        Self {
            context,
            outcome: StepOutcome::Continue,
            journal: Journal::new(),
        }
    }

    pub fn failed(context: MessagingContext) -> Self {
        Self {
            context,
            outcome: StepOutcome::StopFailure,
            journal: Journal::new(),
        }
    }

    /// Stop the remaining steps of this pipeline run. A failed result stays failed.
    pub fn and_stop_execution(mut self) -> Self {
        if self.outcome == StepOutcome::Continue {
            self.outcome = StepOutcome::StopSuccess;
        }
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal.merge(journal);
        self
    }

    /// Attribute a log line to the message currently on the context
    pub fn with_journal_entry(mut self, log_entry: impl Into<String>) -> Self {
        let entry = self
            .context
            .as4_message()
            .and_then(|message| JournalLogEntry::create_from(message, log_entry));
        if let Some(entry) = entry {
            self.journal.push(entry);
        }
        self
    }

    pub fn succeeded(&self) -> bool {
        self.outcome != StepOutcome::StopFailure
    }

    pub fn can_proceed(&self) -> bool {
        self.outcome == StepOutcome::Continue
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier used by the step registry and in logs
    fn name(&self) -> &str;

    async fn execute(&self, context: MessagingContext) -> Result<StepResult>;
}
