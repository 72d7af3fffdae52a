//! End-to-end flows through agents built from the step registry

mod common;

use as4_core::config::{
    AgentConfig, As4Config, ConfigManager, ExceptionHandlerKind, PipelineConfiguration,
    ReceiverKind, TransformerKind,
};
use as4_core::exceptions::InboundExceptionHandler;
use as4_core::ids::UuidIdentifierGenerator;
use as4_core::matching::PModeMatcher;
use as4_core::models::{
    As4Message, ErrorCode, MessageKind, MessageStatus, Operation, ReceptionAwarenessSettings,
    Signature, SignalMessage,
};
use as4_core::persistence::{InMemoryDatastore, MessageRepository, ReceptionAwarenessRepository};
use as4_core::pipeline::{StepDependencies, StepRegistry};
use as4_core::pmode::{FilePModeStore, InMemoryPModeStore};
use as4_core::receivers::{message_callback, MessageCallback, Receiver};
use as4_core::security::MessageSigner;
use as4_core::state_machine::{ReliabilityState, SendResult};
use as4_core::transformers::{As4Codec, JsonAs4Codec, ReceiveMessageTransformer};
use as4_core::{Agent, As4Runtime, Collaborators};
use async_trait::async_trait;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Push-style receiver: messages arrive through [`Agent::process`]
struct PushReceiver;

#[async_trait]
impl Receiver for PushReceiver {
    fn name(&self) -> &str {
        "push"
    }

    async fn start_receiving(&self, _callback: MessageCallback, cancellation: CancellationToken) {
        cancellation.cancelled().await;
    }

    fn stop_receiving(&self) {}
}

fn receive_pipeline() -> PipelineConfiguration {
    PipelineConfiguration {
        normal_pipeline: [
            "DeterminePModes",
            "VerifySignature",
            "SaveReceivedMessage",
            "HandleReceipt",
            "CreateReceipt",
            "SaveOutMessage",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        error_pipeline: vec!["CreateError".to_string(), "SaveOutMessage".to_string()],
    }
}

fn receive_agent(store: &Arc<InMemoryDatastore>, pmodes: InMemoryPModeStore) -> Agent {
    let dependencies = StepDependencies {
        pmode_store: Arc::new(pmodes),
        message_repository: store.clone(),
        reception_awareness_repository: store.clone(),
        sender: Arc::new(ScriptedSender::always(SendResult::Success)),
        codec: Arc::new(JsonAs4Codec),
        signer: None,
        id_generator: Arc::new(UuidIdentifierGenerator::new("test.as4")),
        matcher: Arc::new(PModeMatcher::new()),
    };
    let executor = StepRegistry::with_builtin_steps()
        .build_executor("receive", &receive_pipeline(), &dependencies)
        .unwrap();

    Agent::new(
        "receive_agent",
        Arc::new(PushReceiver),
        Arc::new(ReceiveMessageTransformer::new(Arc::new(JsonAs4Codec))),
        executor,
        Arc::new(InboundExceptionHandler::new(store.clone())),
    )
}

#[tokio::test]
async fn test_pushed_user_message_is_stored_and_answered_with_receipt() {
    let store = Arc::new(InMemoryDatastore::new());
    let pmodes = InMemoryPModeStore::new();
    pmodes.add_receiving_pmode(
        ReceivingPModeBuilder::new("receive-invoices")
            .parties(
                (SENDER_ROLE, &["org:partner"]),
                (RECEIVER_ROLE, &["org:holodeck"]),
            )
            .service_action("urn:services:invoicing", "StoreInvoice")
            .send_receipt(true)
            .deliver()
            .build(),
    );
    let agent = receive_agent(&store, pmodes);

    let message = As4Message::for_user_message(invoice_message("user-1"));
    let context = agent.process(pushed(&message)).await;

    assert!(context.exception.is_none());
    assert_eq!(
        context.receiving_pmode.as_ref().map(|p| p.id.as_str()),
        Some("receive-invoices")
    );
    let receipt = context
        .as4_message()
        .and_then(|m| m.signal_messages().next())
        .cloned();
    let Some(SignalMessage::Receipt(receipt)) = receipt else {
        panic!("expected a receipt, got {:?}", context.as4_message());
    };
    assert_eq!(receipt.ref_to_message_id, "user-1");
    assert!(receipt.message_id.ends_with("@test.as4"));

    let stored = store.get_in_message("user-1").await.unwrap().unwrap();
    assert_eq!(stored.operation, Operation::ToBeDelivered);
    assert_eq!(stored.status, MessageStatus::Received);
    assert_eq!(stored.pmode_id.as_deref(), Some("receive-invoices"));

    let out = store.out_messages();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, MessageKind::Receipt);
    assert_eq!(out[0].ref_to_ebms_message_id.as_deref(), Some("user-1"));
    assert_eq!(out[0].operation, Operation::NotApplicable);
}

#[tokio::test]
async fn test_unmatched_message_runs_error_pipeline() {
    let store = Arc::new(InMemoryDatastore::new());
    let pmodes = InMemoryPModeStore::new();
    pmodes.add_receiving_pmode(
        ReceivingPModeBuilder::new("orders")
            .service_action("urn:services:orders", "PlaceOrder")
            .build(),
    );
    let agent = receive_agent(&store, pmodes);

    let message = As4Message::for_user_message(invoice_message("user-1"));
    let context = agent.process(pushed(&message)).await;

    assert!(context.exception.is_none());
    assert_eq!(
        context.error_result.as_ref().map(|e| e.code),
        Some(ErrorCode::ProcessingModeMismatch)
    );
    // the received message is never stored
    assert!(store.get_in_message("user-1").await.unwrap().is_none());

    let out = store.out_messages();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, MessageKind::Error);
    assert_eq!(out[0].ref_to_ebms_message_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn test_duplicate_delivery_is_recorded_as_in_exception() {
    let store = Arc::new(InMemoryDatastore::new());
    let pmodes = InMemoryPModeStore::new();
    pmodes.add_receiving_pmode(invoice_receiving_pmode("receive-invoices"));
    let agent = receive_agent(&store, pmodes);

    let message = As4Message::for_user_message(invoice_message("user-1"));
    agent.process(pushed(&message)).await;
    let second = agent.process(pushed(&message)).await;

    assert!(second.exception.is_some());
    assert_eq!(second.ebms_message_id(), Some("user-1"));
    assert_eq!(store.in_exception_count(), 1);
    let stored = store.get_in_message("user-1").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Exception);
}

#[tokio::test]
async fn test_garbage_is_handled_without_failing_the_callback() {
    let store = Arc::new(InMemoryDatastore::new());
    let agent = receive_agent(&store, InMemoryPModeStore::new());

    let callback = agent.callback();
    let context = callback(as4_core::models::ReceivedMessage::new(
        b"\x00\x01garbage".to_vec(),
        "application/json",
    ))
    .await;

    assert!(context.exception.is_some());
    assert_eq!(store.in_exception_count(), 1);

    // wrapping an async closure yields the same callback shape
    let echo = message_callback(|received| async move {
        as4_core::models::MessagingContext::from_received(
            received,
            as4_core::models::ProcessingMode::Unknown,
        )
    });
    assert!(echo(pushed(&As4Message::for_user_message(invoice_message("x"))))
        .await
        .received_message()
        .is_some());
}

fn send_config() -> As4Config {
    let mut config = As4Config::default();
    config.reception_awareness.polling_interval_ms = 10;
    config.polling.polling_interval_ms = 10;
    config.pipelines.insert(
        "send".to_string(),
        PipelineConfiguration {
            normal_pipeline: vec![
                "SetReceptionAwareness".to_string(),
                "SignMessage".to_string(),
                "SendMessage".to_string(),
            ],
            error_pipeline: vec![],
        },
    );
    config.agents.push(AgentConfig {
        name: "send_agent".to_string(),
        receiver: ReceiverKind::Datastore,
        operation: Some(Operation::ToBeSent),
        transformer: TransformerKind::Outbound,
        pipeline: "send".to_string(),
        exception_handler: ExceptionHandlerKind::Outbound,
    });
    config
}

#[tokio::test(start_paused = true)]
async fn test_queued_message_is_sent_and_retried_until_delivered() {
    let store = Arc::new(InMemoryDatastore::new());
    store
        .insert_out_message(queued_out_message("out-1", "send-invoices"))
        .await
        .unwrap();

    let pmodes = InMemoryPModeStore::new();
    let mut pmode = sending_pmode("send-invoices", "https://partner.example.com/msh");
    pmode.reception_awareness = ReceptionAwarenessSettings {
        is_enabled: true,
        retry_count: 3,
        retry_interval: "0".to_string(),
    };
    pmodes.add_sending_pmode(pmode);

    let sender = Arc::new(ScriptedSender::scripted(
        vec![SendResult::RetryableFail],
        SendResult::Success,
    ));
    let collaborators = Collaborators {
        pmode_store: Arc::new(pmodes),
        message_repository: store.clone(),
        reception_awareness_repository: store.clone(),
        sender: sender.clone(),
        codec: Arc::new(JsonAs4Codec),
        signer: None,
    };

    let mut runtime = As4Runtime::build(&send_config(), collaborators).unwrap();
    runtime.start().unwrap();

    let mut delivered = false;
    for _ in 0..200 {
        let out = store.get_out_message("out-1").await.unwrap().unwrap();
        if out.status == MessageStatus::Delivered {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runtime.shutdown().await;

    assert!(delivered, "out message was never delivered");
    assert_eq!(sender.attempts(), 2);
    assert_eq!(sender.sent_ids(), vec!["out-1", "out-1"]);

    let record = store.find_for_ebms_message("out-1").await.unwrap();
    assert!(record.is_none(), "completed records are not open anymore");
    let records = store.reception_awareness_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, ReliabilityState::Delivered);
    assert_eq!(records[0].current_retry_count, 1);
    assert!(!runtime.is_running());
}

/// Fixed signature value, enough to tell signed bytes from unsigned ones
struct FixedSigner;

impl MessageSigner for FixedSigner {
    fn sign(&self, _algorithm: &str, _signed_info: &[u8]) -> as4_core::Result<String> {
        Ok("c2lnbmVk".to_string())
    }

    fn verify(&self, _signature: &Signature, _signed_info: &[u8]) -> as4_core::Result<bool> {
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_resends_the_signed_bytes_to_the_first_endpoint() {
    let store = Arc::new(InMemoryDatastore::new());
    let mut queued = queued_out_message("out-1", "send-invoices");
    queued.url = None;
    let unsigned = queued.content.clone();
    store.insert_out_message(queued).await.unwrap();

    let pmodes = InMemoryPModeStore::new();
    let mut pmode = sending_pmode("send-invoices", "https://partner.example.com/msh");
    pmode.signing.is_enabled = true;
    pmode.reception_awareness = ReceptionAwarenessSettings {
        is_enabled: true,
        retry_count: 3,
        retry_interval: "0".to_string(),
    };
    pmodes.add_sending_pmode(pmode);

    let sender = Arc::new(ScriptedSender::scripted(
        vec![SendResult::RetryableFail],
        SendResult::Success,
    ));
    let collaborators = Collaborators {
        pmode_store: Arc::new(pmodes),
        message_repository: store.clone(),
        reception_awareness_repository: store.clone(),
        sender: sender.clone(),
        codec: Arc::new(JsonAs4Codec),
        signer: Some(Arc::new(FixedSigner)),
    };

    let mut runtime = As4Runtime::build(&send_config(), collaborators).unwrap();
    runtime.start().unwrap();

    for _ in 0..200 {
        if sender.attempts() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runtime.shutdown().await;

    let sent = sender.sent_messages();
    assert_eq!(sent.len(), 2, "expected the first attempt and one retry");
    let (first, retry) = (&sent[0], &sent[1]);
    assert_eq!(first.url.as_deref(), Some("https://partner.example.com/msh"));
    assert_eq!(retry.url, first.url);
    assert_eq!(retry.content, first.content);
    assert_ne!(retry.content, unsigned);

    let resent = JsonAs4Codec
        .decode(&retry.content, &retry.content_type)
        .unwrap();
    let signature = resent.security_header.signature.expect("retry is signed");
    assert_eq!(signature.signature_value, "c2lnbmVk");
}

#[tokio::test]
async fn test_shipped_configuration_builds_runtime() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some("config".into()), "test").unwrap();
    let pmodes = FilePModeStore::load(manager.pmode_directory()).unwrap();

    let runtime = As4Runtime::build(
        manager.config(),
        Collaborators::in_memory(
            Arc::new(pmodes),
            Arc::new(ScriptedSender::always(SendResult::Success)),
        ),
    )
    .unwrap();

    let status = runtime.status();
    assert_eq!(status.environment, "test");
    assert_eq!(status.agents, vec!["send_agent", "pull_agent"]);
    assert!(status.reception_awareness_enabled);
    assert!(!status.running);
    assert!(runtime.agent("pull_agent").is_some());
}
