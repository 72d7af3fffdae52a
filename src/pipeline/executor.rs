//! # Step Executor
//!
//! Runs the normal pipeline of an agent and falls back to its error
//! pipeline when a step signals failure. Journals of all executed steps are
//! merged per message identity in execution order.
//!
//! ## Usage
//!
//! ```rust
//! use as4_core::models::{As4Message, MessagingContext, ProcessingMode, UserMessage};
//! use as4_core::pipeline::{StepExecutor, StepOutcome};
//!
//! # tokio_test::block_on(async {
//! let executor = StepExecutor::new("receive", vec![], vec![]);
//! let context = MessagingContext::from_message(
//!     As4Message::for_user_message(UserMessage::new("user-1")),
//!     ProcessingMode::Receive,
//! );
//!
//! let result = executor.execute_steps(context).await.unwrap();
//! assert_eq!(result.outcome, StepOutcome::Continue);
//! assert!(result.journal.is_empty());
//! # });
//! ```

use super::step::{Step, StepOutcome, StepResult};
use crate::error::As4Error;
use crate::logging::log_pipeline_operation;
use crate::models::{Journal, MessagingContext};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Which of the two pipelines a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Normal,
    Error,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A step returned an error instead of a result.
///
/// Carries the context that entered the failing step so the exception
/// handler can still report against the message being processed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Step '{step}' of the normal pipeline failed: {source}")]
    Normal {
        step: String,
        source: As4Error,
        context: Box<MessagingContext>,
    },
    #[error("Step '{step}' of the error pipeline failed: {source}")]
    Error {
        step: String,
        source: As4Error,
        context: Box<MessagingContext>,
    },
}

impl PipelineError {
    fn new(kind: PipelineKind, step: &str, source: As4Error, context: MessagingContext) -> Self {
        let step = step.to_string();
        let context = Box::new(context);
        match kind {
            PipelineKind::Normal => Self::Normal {
                step,
                source,
                context,
            },
            PipelineKind::Error => Self::Error {
                step,
                source,
                context,
            },
        }
    }

    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Normal { .. } => PipelineKind::Normal,
            Self::Error { .. } => PipelineKind::Error,
        }
    }

    pub fn step(&self) -> &str {
        match self {
            Self::Normal { step, .. } | Self::Error { step, .. } => step,
        }
    }

    pub fn context(&self) -> &MessagingContext {
        match self {
            Self::Normal { context, .. } | Self::Error { context, .. } => context,
        }
    }

    pub fn into_parts(self) -> (As4Error, MessagingContext) {
        match self {
            Self::Normal {
                source, context, ..
            }
            | Self::Error {
                source, context, ..
            } => (source, *context),
        }
    }
}

/// Ordered normal and error pipelines for one agent
#[derive(Clone)]
pub struct StepExecutor {
    name: String,
    normal_pipeline: Vec<Arc<dyn Step>>,
    error_pipeline: Vec<Arc<dyn Step>>,
}

impl fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |steps: &[Arc<dyn Step>]| -> Vec<String> {
            steps.iter().map(|s| s.name().to_string()).collect()
        };
        f.debug_struct("StepExecutor")
            .field("name", &self.name)
            .field("normal_pipeline", &names(&self.normal_pipeline))
            .field("error_pipeline", &names(&self.error_pipeline))
            .finish()
    }
}

impl StepExecutor {
    pub fn new(
        name: impl Into<String>,
        normal_pipeline: Vec<Arc<dyn Step>>,
        error_pipeline: Vec<Arc<dyn Step>>,
    ) -> Self {
        Self {
            name: name.into(),
            normal_pipeline,
            error_pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the normal pipeline and, on a signaled failure, the error pipeline.
    ///
    /// The returned result holds the last context and the merged journal.
    /// Its outcome is `StopFailure` whenever the normal pipeline failed, even
    /// if the error pipeline completed.
    pub async fn execute_steps(
        &self,
        context: MessagingContext,
    ) -> Result<StepResult, PipelineError> {
        let mut journal = Journal::new();

        let (context, outcome) = run_pipeline(
            PipelineKind::Normal,
            &self.normal_pipeline,
            context,
            &mut journal,
        )
        .await?;

        if outcome != StepOutcome::StopFailure {
            log_pipeline_operation(
                "execute_steps",
                &self.name,
                context.ebms_message_id(),
                "completed",
                None,
            );
            return Ok(StepResult {
                context,
                outcome,
                journal,
            });
        }

        warn!(
            pipeline = %self.name,
            message_id = context.ebms_message_id(),
            error_steps = self.error_pipeline.len(),
            "Normal pipeline signaled failure, switching to error pipeline"
        );

        let (context, _) = run_pipeline(
            PipelineKind::Error,
            &self.error_pipeline,
            context,
            &mut journal,
        )
        .await?;

        log_pipeline_operation(
            "execute_steps",
            &self.name,
            context.ebms_message_id(),
            "failed",
            Some("error pipeline executed"),
        );

        Ok(StepResult {
            context,
            outcome: StepOutcome::StopFailure,
            journal,
        })
    }
}

async fn run_pipeline(
    kind: PipelineKind,
    steps: &[Arc<dyn Step>],
    mut context: MessagingContext,
    journal: &mut Journal,
) -> Result<(MessagingContext, StepOutcome), PipelineError> {
    for step in steps {
        debug!(
            pipeline = %kind,
            step = step.name(),
            message_id = context.ebms_message_id(),
            "Executing step"
        );

        let entered = context.clone();
        let result = step
            .execute(context)
            .await
            .map_err(|e| PipelineError::new(kind, step.name(), e, entered))?;

        journal.merge(result.journal);
        context = result.context;

        if result.outcome != StepOutcome::Continue {
            debug!(
                pipeline = %kind,
                step = step.name(),
                outcome = ?result.outcome,
                "Step stopped the pipeline"
            );
            return Ok((context, result.outcome));
        }
    }

    Ok((context, StepOutcome::Continue))
}
