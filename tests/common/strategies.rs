use as4_core::models::{ReceivingPMode, UserMessage};
use as4_core::state_machine::SendResult;
use proptest::prelude::*;
use std::time::Duration;

use super::builders::{ReceivingPModeBuilder, UserMessageBuilder};

const ROLES: [&str; 2] = ["Sender", "Receiver"];
const PARTY_IDS: [&str; 3] = ["org:a", "org:b", "org:c"];
const SERVICES: [&str; 2] = ["urn:services:invoicing", "urn:services:orders"];
const ACTIONS: [&str; 2] = ["Store", "Cancel"];

fn party_ids_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(PARTY_IDS.to_vec(), 1..=PARTY_IDS.len())
}

/// Strategy for intervals between 1ms and 10 minutes
pub fn interval_strategy() -> impl Strategy<Value = Duration> {
    (1u64..600_000).prop_map(Duration::from_millis)
}

/// Strategy for transport outcomes
pub fn send_result_strategy() -> impl Strategy<Value = SendResult> {
    prop_oneof![
        Just(SendResult::Success),
        Just(SendResult::RetryableFail),
        Just(SendResult::FatalFail),
    ]
}

/// Strategy for user messages drawn from a small vocabulary, so PModes match often
pub fn user_message_strategy() -> impl Strategy<Value = UserMessage> {
    (
        party_ids_strategy(),
        party_ids_strategy(),
        prop::sample::select(SERVICES.to_vec()),
        prop::sample::select(ACTIONS.to_vec()),
    )
        .prop_map(|(from, to, service, action)| {
            UserMessageBuilder::new("prop-1")
                .from_party(ROLES[0], &from)
                .to_party(ROLES[1], &to)
                .service_action(service, action)
                .build()
        })
}

/// Strategy for receiving PModes drawn from the same vocabulary
pub fn receiving_pmode_strategy() -> impl Strategy<Value = ReceivingPMode> {
    (
        "[a-z]{4,8}",
        prop::option::of((party_ids_strategy(), party_ids_strategy())),
        prop::option::of((
            prop::sample::select(SERVICES.to_vec()),
            prop::sample::select(ACTIONS.to_vec()),
        )),
    )
        .prop_map(|(id, parties, service_action)| {
            let mut builder = ReceivingPModeBuilder::new(&id);
            if let Some((from, to)) = parties {
                builder = builder.parties((ROLES[0], &from), (ROLES[1], &to));
            }
            if let Some((service, action)) = service_action {
                builder = builder.service_action(service, action);
            }
            builder.build()
        })
}
