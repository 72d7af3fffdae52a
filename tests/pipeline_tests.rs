//! Step executor behavior across normal and error pipelines

mod common;

use as4_core::error::As4Error;
use as4_core::models::{As4Message, MessagingContext, ProcessingMode, UserMessage};
use as4_core::pipeline::{PipelineError, PipelineKind, Step, StepExecutor, StepOutcome};
use common::*;
use std::sync::Arc;

fn user_context(message_id: &str) -> MessagingContext {
    MessagingContext::from_message(
        As4Message::for_user_message(UserMessage::new(message_id)),
        ProcessingMode::Receive,
    )
}

#[tokio::test]
async fn test_journal_is_merged_per_message_identity() {
    let executor = StepExecutor::new(
        "receive",
        vec![
            JournalStep::new("First", "Log entry 1"),
            JournalStep::new("Second", "Log entry 2"),
            ReceiptSwapStep::new("Log entry 3", "receipt-1"),
            JournalStep::new("OnReceipt", "Log entry 1"),
        ],
        vec![],
    );

    let result = executor.execute_steps(user_context("user-1")).await.unwrap();

    assert_eq!(result.outcome, StepOutcome::Continue);
    assert_eq!(
        result.journal.log_entries_for("user-1"),
        vec!["Log entry 1", "Log entry 2", "Log entry 3"]
    );
    assert_eq!(result.journal.log_entries_for("receipt-1"), vec!["Log entry 1"]);
    assert_eq!(result.context.ebms_message_id(), Some("receipt-1"));
}

#[tokio::test]
async fn test_signaled_failure_switches_to_error_pipeline() {
    let skipped = CountingStep::new();
    let error_step = CountingStep::new();
    let executor = StepExecutor::new(
        "receive",
        vec![
            JournalStep::new("First", "Received"),
            Arc::new(SignalFailureStep),
            skipped.clone() as Arc<dyn Step>,
        ],
        vec![
            error_step.clone() as Arc<dyn Step>,
            JournalStep::new("ErrorJournal", "Error created"),
        ],
    );

    let result = executor.execute_steps(user_context("user-1")).await.unwrap();

    assert_eq!(result.outcome, StepOutcome::StopFailure);
    assert!(!result.succeeded());
    assert_eq!(skipped.runs(), 0);
    assert_eq!(error_step.runs(), 1);
    assert_eq!(
        result.journal.log_entries_for("user-1"),
        vec!["Received", "Failure signaled", "Error created"]
    );
}

#[tokio::test]
async fn test_failure_with_empty_error_pipeline_still_fails() {
    let executor = StepExecutor::new("send", vec![Arc::new(SignalFailureStep)], vec![]);

    let result = executor.execute_steps(user_context("user-1")).await.unwrap();
    assert_eq!(result.outcome, StepOutcome::StopFailure);
}

#[tokio::test]
async fn test_step_error_aborts_with_entering_context() {
    let after = CountingStep::new();
    let executor = StepExecutor::new(
        "receive",
        vec![
            JournalStep::new("First", "Received"),
            Arc::new(ErrorStep("Broken")),
            after.clone() as Arc<dyn Step>,
        ],
        vec![],
    );

    let error = executor
        .execute_steps(user_context("user-1"))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), PipelineKind::Normal);
    assert_eq!(error.step(), "Broken");
    assert_eq!(error.context().ebms_message_id(), Some("user-1"));
    assert_eq!(after.runs(), 0);

    let (source, _) = error.into_parts();
    assert!(matches!(source, As4Error::StepExecution { .. }));
}

#[tokio::test]
async fn test_error_pipeline_error_is_reported_as_such() {
    let executor = StepExecutor::new(
        "receive",
        vec![Arc::new(SignalFailureStep)],
        vec![Arc::new(ErrorStep("BrokenErrorStep"))],
    );

    let error = executor
        .execute_steps(user_context("user-1"))
        .await
        .unwrap_err();

    assert!(matches!(error, PipelineError::Error { .. }));
    assert_eq!(error.step(), "BrokenErrorStep");
}

#[tokio::test]
async fn test_stop_success_skips_remaining_steps() {
    struct Stop;

    #[async_trait::async_trait]
    impl Step for Stop {
        fn name(&self) -> &str {
            "Stop"
        }

        async fn execute(
            &self,
            context: MessagingContext,
        ) -> as4_core::Result<as4_core::pipeline::StepResult> {
            Ok(as4_core::pipeline::StepResult::success(context).and_stop_execution())
        }
    }

    let after = CountingStep::new();
    let error_step = CountingStep::new();
    let executor = StepExecutor::new(
        "send",
        vec![Arc::new(Stop), after.clone() as Arc<dyn Step>],
        vec![error_step.clone() as Arc<dyn Step>],
    );

    let result = executor.execute_steps(user_context("user-1")).await.unwrap();
    assert_eq!(result.outcome, StepOutcome::StopSuccess);
    assert!(result.succeeded());
    assert_eq!(after.runs(), 0);
    assert_eq!(error_step.runs(), 0);
}
