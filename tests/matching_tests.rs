//! PMode selection through the matcher, the stores and the DeterminePModes step

mod common;

use as4_core::matching::PModeMatcher;
use as4_core::models::{As4Message, ErrorCode, MessagingContext, ProcessingMode};
use as4_core::pipeline::steps::DeterminePModesStep;
use as4_core::pipeline::{Step, StepOutcome};
use as4_core::pmode::{FilePModeStore, InMemoryPModeStore, PModeStore};
use common::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn receive_context(message: As4Message) -> MessagingContext {
    MessagingContext::from_message(message, ProcessingMode::Receive)
}

#[test]
fn test_score_boundaries_for_party_combinations() {
    let matcher = PModeMatcher::new();
    let message = invoice_message("user-1");

    let both = ReceivingPModeBuilder::new("both")
        .parties(
            (SENDER_ROLE, &["org:partner"]),
            (RECEIVER_ROLE, &["org:holodeck"]),
        )
        .build();
    assert_eq!(matcher.score(&both, &message), 16);

    let from_only = ReceivingPModeBuilder::new("from")
        .parties(("Other", &["org:partner"]), (RECEIVER_ROLE, &["org:nobody"]))
        .build();
    assert_eq!(matcher.score(&from_only, &message), 7);

    let to_only = ReceivingPModeBuilder::new("to")
        .parties((SENDER_ROLE, &["org:nobody"]), ("Other", &["org:holodeck"]))
        .build();
    assert_eq!(matcher.score(&to_only, &message), 8);

    let neither = ReceivingPModeBuilder::new("neither")
        .parties(("Other", &["org:x"]), ("Other", &["org:y"]))
        .build();
    assert_eq!(matcher.score(&neither, &message), 0);

    assert_eq!(matcher.score(&invoice_receiving_pmode("full"), &message), 23);
}

#[test]
fn test_message_may_carry_more_party_ids_than_declared() {
    let matcher = PModeMatcher::new();
    let message = UserMessageBuilder::new("user-1")
        .from_party(SENDER_ROLE, &["org:partner", "gln:5790000000001"])
        .to_party(RECEIVER_ROLE, &["org:holodeck"])
        .build();

    let subset = ReceivingPModeBuilder::new("subset")
        .parties(
            (SENDER_ROLE, &["org:partner"]),
            (RECEIVER_ROLE, &["org:holodeck"]),
        )
        .build();
    assert_eq!(matcher.score(&subset, &message), 16);

    let superset = ReceivingPModeBuilder::new("superset")
        .parties(
            (SENDER_ROLE, &["org:partner"]),
            (RECEIVER_ROLE, &["org:holodeck", "org:other"]),
        )
        .build();
    assert_eq!(matcher.score(&superset, &message), 7 + 1);
}

#[test]
fn test_highest_score_wins_regardless_of_order() {
    let matcher = PModeMatcher::new();
    let message = invoice_message("user-1");

    let candidates = vec![
        ReceivingPModeBuilder::new("service-only")
            .service_action("urn:services:invoicing", "StoreInvoice")
            .build(),
        invoice_receiving_pmode("full"),
        ReceivingPModeBuilder::new("agreement-only")
            .agreement("urn:agreements:invoicing")
            .build(),
    ];

    let best = matcher.find_best_match(&candidates, &message).unwrap();
    assert_eq!(best.pmode.id, "full");
    assert_eq!(best.score, 23);
}

#[test]
fn test_equal_scores_keep_first_declared() {
    let matcher = PModeMatcher::new();
    let message = invoice_message("user-1");
    let candidates = vec![
        ReceivingPModeBuilder::new("alpha")
            .service_action("urn:services:invoicing", "StoreInvoice")
            .build(),
        ReceivingPModeBuilder::new("beta")
            .service_action("urn:services:invoicing", "StoreInvoice")
            .build(),
    ];

    let best = matcher.find_best_match(&candidates, &message).unwrap();
    assert_eq!(best.pmode.id, "alpha");

    let reversed: Vec<_> = candidates.into_iter().rev().collect();
    let best = matcher.find_best_match(&reversed, &message).unwrap();
    assert_eq!(best.pmode.id, "beta");
}

#[test]
fn test_nothing_selected_without_points() {
    let matcher = PModeMatcher::new();
    let candidates = vec![ReceivingPModeBuilder::new("orders")
        .service_action("urn:services:orders", "PlaceOrder")
        .build()];
    assert!(matcher
        .find_best_match(&candidates, &invoice_message("user-1"))
        .is_none());
    assert!(matcher
        .find_best_match(&[], &invoice_message("user-1"))
        .is_none());
}

#[tokio::test]
async fn test_shipped_pmodes_prefer_party_specific_configuration() {
    let store = FilePModeStore::load(Path::new("config/pmodes")).unwrap();
    let candidates = store.receiving_pmodes().await.unwrap();
    assert_eq!(candidates.len(), 2);

    let best = PModeMatcher::new()
        .find_best_match(&candidates, &invoice_message("user-1"))
        .unwrap();
    assert_eq!(best.pmode.id, "receive-invoices");
    // roles in the shipped files are the ebMS initiator/responder URIs
    assert_eq!(best.score, 7 + 8 + 3);
}

#[tokio::test]
async fn test_file_name_order_breaks_ties() {
    let dir = TempDir::new().unwrap();
    let receive = dir.path().join("receive");
    fs::create_dir_all(&receive).unwrap();
    let body = |id: &str| {
        format!(
            "id: {id}\nmessage_packaging:\n  collaboration_info:\n    service:\n      value: urn:services:invoicing\n    action: StoreInvoice\n"
        )
    };
    fs::write(receive.join("b-second.yaml"), body("second")).unwrap();
    fs::write(receive.join("a-first.yaml"), body("first")).unwrap();

    let store = Arc::new(FilePModeStore::load(dir.path()).unwrap());
    let step = DeterminePModesStep::new(store, Arc::new(PModeMatcher::new()));

    let result = step
        .execute(receive_context(As4Message::for_user_message(invoice_message(
            "user-1",
        ))))
        .await
        .unwrap();

    assert_eq!(result.outcome, StepOutcome::Continue);
    assert_eq!(
        result.context.receiving_pmode.as_ref().map(|p| p.id.as_str()),
        Some("first")
    );
    assert_eq!(
        result.journal.log_entries_for("user-1"),
        vec!["Receiving PMode 'first' matched with score 3"]
    );
}

#[tokio::test]
async fn test_unmatched_message_fails_with_processing_mode_mismatch() {
    let store = InMemoryPModeStore::new();
    store.add_receiving_pmode(
        ReceivingPModeBuilder::new("orders")
            .service_action("urn:services:orders", "PlaceOrder")
            .build(),
    );
    let step = DeterminePModesStep::new(Arc::new(store), Arc::new(PModeMatcher::new()));

    let result = step
        .execute(receive_context(As4Message::for_user_message(invoice_message(
            "user-1",
        ))))
        .await
        .unwrap();

    assert_eq!(result.outcome, StepOutcome::StopFailure);
    assert_eq!(
        result.context.error_result.as_ref().map(|e| e.code),
        Some(ErrorCode::ProcessingModeMismatch)
    );
}
