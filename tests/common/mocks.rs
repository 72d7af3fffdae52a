//! Scriptable collaborators for integration tests

use as4_core::error::{As4Error, Result};
use as4_core::exceptions::ExceptionHandler;
use as4_core::models::{
    As4Message, MessagingContext, ProcessingMode, Receipt, ReceivedMessage, SignalMessage,
};
use as4_core::pipeline::{Step, StepResult};
use as4_core::state_machine::SendResult;
use as4_core::transport::{MessageSender, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sender replaying a script of results, then repeating the fallback
pub struct ScriptedSender {
    script: Mutex<VecDeque<SendResult>>,
    fallback: SendResult,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl ScriptedSender {
    pub fn always(result: SendResult) -> Self {
        Self::scripted(Vec::new(), result)
    }

    pub fn scripted(script: Vec<SendResult>, fallback: SendResult) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| m.ebms_message_id.clone())
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send_and_receive(&self, message: &OutboundMessage) -> SendOutcome {
        self.sent.lock().push(message.clone());
        let result = self.script.lock().pop_front().unwrap_or(self.fallback);
        SendOutcome::new(result)
    }
}

/// Appends one journal line for the current message identity
pub struct JournalStep {
    name: String,
    entry: String,
}

impl JournalStep {
    pub fn new(name: &str, entry: &str) -> Arc<dyn Step> {
        Arc::new(Self {
            name: name.to_string(),
            entry: entry.to_string(),
        })
    }
}

#[async_trait]
impl Step for JournalStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        Ok(StepResult::success(context).with_journal_entry(self.entry.clone()))
    }
}

/// Journals under the current identity, then swaps the message for a receipt
pub struct ReceiptSwapStep {
    entry: String,
    receipt_id: String,
}

impl ReceiptSwapStep {
    pub fn new(entry: &str, receipt_id: &str) -> Arc<dyn Step> {
        Arc::new(Self {
            entry: entry.to_string(),
            receipt_id: receipt_id.to_string(),
        })
    }
}

#[async_trait]
impl Step for ReceiptSwapStep {
    fn name(&self) -> &str {
        "ReceiptSwap"
    }

    async fn execute(&self, mut context: MessagingContext) -> Result<StepResult> {
        let journal = StepResult::success(context.clone())
            .with_journal_entry(self.entry.clone())
            .journal;
        let ref_to = context.ebms_message_id().unwrap_or_default().to_string();
        context.replace_message(As4Message::for_signal(SignalMessage::Receipt(Receipt {
            message_id: self.receipt_id.clone(),
            ref_to_message_id: ref_to,
            timestamp: Utc::now(),
        })));
        Ok(StepResult::success(context).with_journal(journal))
    }
}

/// Signals a deliberate failure
pub struct SignalFailureStep;

#[async_trait]
impl Step for SignalFailureStep {
    fn name(&self) -> &str {
        "SignalFailure"
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        Ok(StepResult::failed(context).with_journal_entry("Failure signaled"))
    }
}

/// Returns an error instead of a result
pub struct ErrorStep(pub &'static str);

#[async_trait]
impl Step for ErrorStep {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, _context: MessagingContext) -> Result<StepResult> {
        Err(As4Error::step_execution(self.0, "unexpected failure"))
    }
}

/// Counts executions; panics if asked to
pub struct CountingStep {
    pub runs: AtomicUsize,
}

impl CountingStep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for CountingStep {
    fn name(&self) -> &str {
        "Counting"
    }

    async fn execute(&self, context: MessagingContext) -> Result<StepResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(StepResult::success(context))
    }
}

/// How a [`ScriptedExceptionHandler`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Exception handler counting invocations per operation
pub struct ScriptedExceptionHandler {
    behavior: HandlerBehavior,
    pub transformation_calls: AtomicUsize,
    pub execution_calls: AtomicUsize,
    pub error_calls: AtomicUsize,
}

impl ScriptedExceptionHandler {
    pub fn new(behavior: HandlerBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            transformation_calls: AtomicUsize::new(0),
            execution_calls: AtomicUsize::new(0),
            error_calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.transformation_calls.load(Ordering::SeqCst),
            self.execution_calls.load(Ordering::SeqCst),
            self.error_calls.load(Ordering::SeqCst),
        )
    }

    fn outcome(&self, context: MessagingContext) -> Result<MessagingContext> {
        match self.behavior {
            HandlerBehavior::Succeed => Ok(context.with_exception(As4Error::Internal(
                "handled by scripted handler".to_string(),
            ))),
            HandlerBehavior::Fail => Err(As4Error::persistence(
                "insert_exception",
                "store unavailable",
            )),
            HandlerBehavior::Panic => panic!("exception handler defect"),
        }
    }
}

#[async_trait]
impl ExceptionHandler for ScriptedExceptionHandler {
    async fn handle_transformation_exception(
        &self,
        _error: As4Error,
        received: ReceivedMessage,
    ) -> Result<MessagingContext> {
        self.transformation_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome(MessagingContext::from_received(
            received,
            ProcessingMode::Unknown,
        ))
    }

    async fn handle_execution_exception(
        &self,
        _error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.execution_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome(context)
    }

    async fn handle_error_exception(
        &self,
        _error: As4Error,
        context: MessagingContext,
    ) -> Result<MessagingContext> {
        self.error_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome(context)
    }
}
