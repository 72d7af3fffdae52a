//! Receiver issuing pull requests on configured message partition channels.
//!
//! Every MPC keeps its own [`IntervalRequest`]. A pull answered with a user
//! message resets the interval to its minimum; an EBMS:0006 (empty MPC)
//! answer, or any other answer without a user message, backs it off.

use super::interval::IntervalRequest;
use super::polling::PollingTemplate;
use super::MessageCallback;
use crate::error::{As4Error, Result};
use crate::ids::IdentifierGenerator;
use crate::models::{
    As4Message, MessageOrigin, MessagingContext, PullRequest, ReceivedMessage, SignalMessage,
};
use crate::transformers::As4Codec;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One MPC to pull from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMpc {
    pub mpc: String,
    /// Sending PMode used to issue the pull request
    pub pmode_id: Option<String>,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

#[derive(Debug)]
struct MpcSchedule {
    interval: IntervalRequest,
    next_due: Instant,
    in_flight: bool,
}

pub struct PullRequestReceiver {
    name: String,
    mpcs: HashMap<String, PullMpc>,
    schedules: Mutex<HashMap<String, MpcSchedule>>,
    tick: Duration,
    codec: Arc<dyn As4Codec>,
    id_generator: Arc<dyn IdentifierGenerator>,
}

impl PullRequestReceiver {
    /// `tick` is how often the receiver checks for due MPCs
    pub fn new(
        name: impl Into<String>,
        mpcs: Vec<PullMpc>,
        tick: Duration,
        codec: Arc<dyn As4Codec>,
        id_generator: Arc<dyn IdentifierGenerator>,
    ) -> Self {
        let now = Instant::now();
        let schedules = mpcs
            .iter()
            .map(|m| {
                (
                    m.mpc.clone(),
                    MpcSchedule {
                        interval: IntervalRequest::new(m.min_interval, m.max_interval),
                        next_due: now,
                        in_flight: false,
                    },
                )
            })
            .collect();

        Self {
            name: name.into(),
            mpcs: mpcs.into_iter().map(|m| (m.mpc.clone(), m)).collect(),
            schedules: Mutex::new(schedules),
            tick,
            codec,
            id_generator,
        }
    }

    /// Current back-off interval of `mpc`
    pub fn current_interval(&self, mpc: &str) -> Option<Duration> {
        self.schedules
            .lock()
            .get(mpc)
            .map(|s| s.interval.current_interval())
    }

    fn reschedule(&self, mpc: &str, received_user_message: bool) {
        let mut schedules = self.schedules.lock();
        let Some(schedule) = schedules.get_mut(mpc) else {
            return;
        };

        if received_user_message {
            schedule.interval.reset_interval();
        } else {
            schedule.interval.calculate_new_interval();
        }
        schedule.in_flight = false;
        schedule.next_due = Instant::now() + schedule.interval.current_interval();
        debug!(
            receiver = %self.name,
            mpc = %mpc,
            interval_ms = schedule.interval.current_interval().as_millis() as u64,
            "Pull rescheduled"
        );
    }

    fn pull_request(&self, target: &PullMpc) -> Result<ReceivedMessage> {
        let message = As4Message::for_signal(SignalMessage::PullRequest(PullRequest {
            message_id: self.id_generator.generate(),
            timestamp: Utc::now(),
            mpc: target.mpc.clone(),
        }));
        Ok(
            ReceivedMessage::new(self.codec.encode(&message)?, self.codec.content_type())
                .with_origin(MessageOrigin::Pull {
                    mpc: target.mpc.clone(),
                    pmode_id: target.pmode_id.clone(),
                }),
        )
    }
}

fn carries_user_message(context: &MessagingContext) -> bool {
    context
        .as4_message()
        .is_some_and(|m| m.primary_user_message().is_some())
}

#[async_trait]
impl PollingTemplate for PullRequestReceiver {
    type Item = PullMpc;
    type Callback = MessageCallback;

    fn name(&self) -> &str {
        &self.name
    }

    fn polling_interval(&self) -> Duration {
        self.tick
    }

    async fn get_messages_to_poll(&self) -> Result<Vec<PullMpc>> {
        let now = Instant::now();
        let mut schedules = self.schedules.lock();

        let mut due = Vec::new();
        for (mpc, schedule) in schedules.iter_mut() {
            if schedule.in_flight || schedule.next_due > now {
                continue;
            }
            if let Some(target) = self.mpcs.get(mpc) {
                schedule.in_flight = true;
                due.push(target.clone());
            }
        }
        Ok(due)
    }

    async fn message_received(&self, item: PullMpc, callback: MessageCallback) -> Result<()> {
        let request = match self.pull_request(&item) {
            Ok(request) => request,
            Err(e) => {
                self.reschedule(&item.mpc, false);
                return Err(e);
            }
        };

        let context = callback(request).await;
        self.reschedule(&item.mpc, carries_user_message(&context));
        Ok(())
    }

    async fn handle_message_exception(&self, item: &PullMpc, error: &As4Error) {
        warn!(receiver = %self.name, mpc = %item.mpc, error = %error, "Pull request failed");
        self.reschedule(&item.mpc, false);
    }

    async fn release_pending_items(&self) -> Result<()> {
        for schedule in self.schedules.lock().values_mut() {
            schedule.in_flight = false;
        }
        Ok(())
    }
}
