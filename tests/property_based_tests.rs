mod common;

use as4_core::matching::{PModeMatcher, AGREEMENT_POINTS, ROLE_POINTS, SERVICE_ACTION_POINTS};
use as4_core::models::{Journal, JournalLogEntry, ReceptionAwareness};
use as4_core::receivers::IntervalRequest;
use as4_core::state_machine::SendResult;
use chrono::Utc;
use common::strategies::*;
use proptest::prelude::*;

const MAX_SCORE: u32 = AGREEMENT_POINTS + 7 + 8 + ROLE_POINTS + SERVICE_ACTION_POINTS;

proptest! {
    /// Property: the back-off interval stays within its bounds and never shrinks
    #[test]
    fn backoff_interval_is_bounded_and_monotonic(
        min in interval_strategy(),
        max in interval_strategy(),
        polls in 1usize..40,
    ) {
        let mut interval = IntervalRequest::new(min, max);
        let upper = max.max(min);
        let mut previous = interval.current_interval();
        prop_assert_eq!(previous, min);

        for _ in 0..polls {
            let next = interval.calculate_new_interval();
            prop_assert!(next >= min, "{:?} fell below {:?}", next, min);
            prop_assert!(next <= upper, "{:?} exceeded {:?}", next, upper);
            prop_assert!(next >= previous);
            previous = next;
        }

        interval.reset_interval();
        prop_assert_eq!(interval.current_interval(), min);
        prop_assert_eq!(interval.runs(), 0);
    }

    /// Property: scoring is deterministic and bounded by the maximum total
    #[test]
    fn scores_are_deterministic_and_bounded(
        pmode in receiving_pmode_strategy(),
        message in user_message_strategy(),
    ) {
        let matcher = PModeMatcher::new();
        let score = matcher.score(&pmode, &message);
        prop_assert_eq!(score, matcher.score(&pmode, &message));
        prop_assert!(score <= MAX_SCORE);
    }

    /// Property: the selected PMode has the highest score and is the first with it
    #[test]
    fn best_match_is_first_highest_scorer(
        pmodes in prop::collection::vec(receiving_pmode_strategy(), 0..8),
        message in user_message_strategy(),
    ) {
        let matcher = PModeMatcher::new();
        let scores: Vec<u32> = pmodes.iter().map(|p| matcher.score(p, &message)).collect();
        let highest = scores.iter().copied().max().unwrap_or(0);

        match matcher.find_best_match(&pmodes, &message) {
            Some(best) => {
                prop_assert_eq!(best.score, highest);
                let first = scores.iter().position(|s| *s == highest).unwrap();
                prop_assert!(std::ptr::eq(best.pmode, &pmodes[first]));
            }
            None => prop_assert_eq!(highest, 0),
        }
    }

    /// Property: the retry counter never decreases nor exceeds the budget, and
    /// terminal records accept no further results
    #[test]
    fn retry_count_is_monotonic_and_bounded(
        total in 0u32..6,
        results in prop::collection::vec(send_result_strategy(), 1..12),
    ) {
        let mut record = ReceptionAwareness::new("ra-1", "out-1", total, "00:00:05", Utc::now());
        let mut previous = record.current_retry_count;

        for result in results {
            let was_completed = record.is_completed;
            let applied = record.apply_send_result(result, Utc::now());

            if was_completed {
                prop_assert!(applied.is_err());
                continue;
            }
            let transition = applied.unwrap();
            prop_assert!(record.current_retry_count >= previous);
            prop_assert!(record.current_retry_count <= total);
            prop_assert_eq!(
                transition.retry_scheduled,
                result == SendResult::RetryableFail && previous < total
            );
            prop_assert_eq!(record.is_completed, transition.is_terminal());
            previous = record.current_retry_count;
        }
    }

    /// Property: merged journals keep per-identity execution order
    #[test]
    fn journal_keeps_order_per_identity(
        writes in prop::collection::vec((0usize..3, "[a-z]{1,6}"), 0..20),
    ) {
        let ids = ["user-1", "receipt-1", "error-1"];
        let mut journal = Journal::new();
        for (index, (id, line)) in writes.iter().enumerate() {
            let mut step = Journal::new();
            step.push(JournalLogEntry::new(Some(ids[*id].to_string()), None, format!("{index}:{line}")));
            journal.merge(step);
        }

        for (position, id) in ids.iter().enumerate() {
            let expected: Vec<String> = writes
                .iter()
                .enumerate()
                .filter(|(_, (i, _))| *i == position)
                .map(|(index, (_, line))| format!("{index}:{line}"))
                .collect();
            prop_assert_eq!(journal.log_entries_for(id), expected);
        }
    }
}
