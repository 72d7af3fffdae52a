//! # PMode Matching
//!
//! Scores receiving PModes against an incoming user message with a set of
//! independent rules and selects the best candidate.
//!
//! | rule           | points                                              |
//! |----------------|-----------------------------------------------------|
//! | agreement      | 4                                                   |
//! | party info     | From 7, To 8, both 15, +1 when both roles match     |
//! | service/action | 3                                                   |
//!
//! The maximum total is 23. The highest total wins; a total of 0 never
//! matches. Between equal totals the PMode enumerated first wins. A PMode
//! party is matched by containment of its party ids, so a party that only
//! declares a role contributes to the role point but never to From/To.

use crate::models::{Party, ReceivingPMode, UserMessage};
use std::fmt;

pub const AGREEMENT_POINTS: u32 = 4;
pub const FROM_PARTY_POINTS: u32 = 7;
pub const TO_PARTY_POINTS: u32 = 8;
pub const ROLE_POINTS: u32 = 1;
pub const SERVICE_ACTION_POINTS: u32 = 3;

/// One independent scoring rule
pub trait PModeRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32;
}

/// Agreement references match on value, type and PMode id
#[derive(Debug, Clone, Copy, Default)]
pub struct AgreementRule;

impl PModeRule for AgreementRule {
    fn name(&self) -> &'static str {
        "agreement"
    }

    fn score(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32 {
        let expected = pmode
            .message_packaging
            .collaboration_info
            .as_ref()
            .and_then(|c| c.agreement_reference.as_ref());
        let actual = message.collaboration_info.agreement_reference.as_ref();

        match (expected, actual) {
            (Some(expected), Some(actual)) if expected == actual => AGREEMENT_POINTS,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PartyRule;

impl PartyRule {
    /// Every party id the PMode declares must be present on the message party.
    /// A party declaring only a role has no ids to contain and never matches.
    fn party_matches(expected: Option<&Party>, actual: &Party) -> bool {
        match expected {
            Some(expected) if !expected.party_ids.is_empty() => expected
                .party_ids
                .iter()
                .all(|id| actual.party_ids.contains(id)),
            _ => false,
        }
    }

    fn roles_match(expected: Option<&Party>, actual: &Party) -> bool {
        expected.is_some_and(|p| !p.role.is_empty() && p.role.eq_ignore_ascii_case(&actual.role))
    }
}

impl PModeRule for PartyRule {
    fn name(&self) -> &'static str {
        "party_info"
    }

    fn score(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32 {
        let Some(party_info) = pmode.message_packaging.party_info.as_ref() else {
            return 0;
        };
        if party_info.is_empty() {
            return 0;
        }

        let from = party_info.from_party.as_ref();
        let to = party_info.to_party.as_ref();

        let mut points = 0;
        if Self::party_matches(from, &message.sender) {
            points += FROM_PARTY_POINTS;
        }
        if Self::party_matches(to, &message.receiver) {
            points += TO_PARTY_POINTS;
        }
        if Self::roles_match(from, &message.sender) && Self::roles_match(to, &message.receiver) {
            points += ROLE_POINTS;
        }
        points
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceActionRule;

impl PModeRule for ServiceActionRule {
    fn name(&self) -> &'static str {
        "service_action"
    }

    fn score(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32 {
        match pmode.message_packaging.collaboration_info.as_ref() {
            Some(expected)
                if expected.action == message.collaboration_info.action
                    && expected.service == message.collaboration_info.service =>
            {
                SERVICE_ACTION_POINTS
            }
            _ => 0,
        }
    }
}

/// Selected PMode and its total score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PModeMatch<'a> {
    pub pmode: &'a ReceivingPMode,
    pub score: u32,
}

pub struct PModeMatcher {
    rules: Vec<Box<dyn PModeRule>>,
}

impl fmt::Debug for PModeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("PModeMatcher").field("rules", &names).finish()
    }
}

impl Default for PModeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PModeMatcher {
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(AgreementRule),
            Box::new(PartyRule),
            Box::new(ServiceActionRule),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn PModeRule>>) -> Self {
        Self { rules }
    }

    pub fn score(&self, pmode: &ReceivingPMode, message: &UserMessage) -> u32 {
        self.rules.iter().map(|rule| rule.score(pmode, message)).sum()
    }

    /// Highest scoring candidate, `None` when nothing scores above zero
    pub fn find_best_match<'a>(
        &self,
        pmodes: &'a [ReceivingPMode],
        message: &UserMessage,
    ) -> Option<PModeMatch<'a>> {
        let mut best: Option<PModeMatch<'a>> = None;
        for pmode in pmodes {
            let score = self.score(pmode, message);
            if score == 0 {
                continue;
            }
            // strictly greater: the first declared PMode keeps a tie
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(PModeMatch { pmode, score });
            }
        }
        best
    }
}
