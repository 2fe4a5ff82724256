use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::db::Participant;
use crate::store::Store;

/// How recent `last_seen` must be for a participant to count as online.
pub const ONLINE_WINDOW: Duration = Duration::seconds(60);

/// Time between liveness writes. Half the online window, so one missed
/// heartbeat does not flip a participant offline.
pub const HEARTBEAT_PERIOD: StdDuration = StdDuration::from_secs(30);

/// True iff the participant was seen strictly less than [`ONLINE_WINDOW`]
/// before `now`.
pub fn is_online(participant: &Participant, now: OffsetDateTime) -> bool {
    now - participant.last_seen < ONLINE_WINDOW
}

/// The subset of a roster currently online, in roster order.
pub fn online_participants(
    participants: &[Participant],
    now: OffsetDateTime,
) -> Vec<&Participant> {
    participants
        .iter()
        .filter(|participant| is_online(participant, now))
        .collect()
}

/// Keeps the local participant's `last_seen` fresh: one write on activation,
/// then one per [`HEARTBEAT_PERIOD`] until deactivated. Failed writes are
/// logged and swallowed.
pub struct PresenceTracker {
    heartbeat: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    pub fn activate<S: Store>(store: S, room_id: Uuid, user_name: String) -> Self {
        let heartbeat = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(HEARTBEAT_PERIOD);
            loop {
                // first tick completes immediately
                ticks.tick().await;
                if let Err(err) = store.touch_presence(room_id, &user_name).await {
                    warn!(%room_id, %user_name, %err, "presence heartbeat failed");
                }
            }
        });

        Self {
            heartbeat: Some(heartbeat),
        }
    }

    /// Cancels the pending interval; no further writes occur afterwards.
    pub fn deactivate(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.deactivate();
    }
}
