use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{Message, Participant};
use crate::rooms::presence::PresenceTracker;
use crate::store::{ParticipantChange, Store, StoreError};

/// `Live` is entered only after the bulk load and the join have all settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Live,
    TornDown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("live feed lagged, {0} events dropped")]
    FeedLagged(u64),
}

/// One room's in-memory view for one viewing session: the ordered message
/// sequence, the participant roster, and the write path for outgoing
/// messages. All mutation happens on a single driver task; errors land in a
/// latest-error slot instead of being raised.
pub struct ChatSync<S: Store> {
    store: S,
    shared: Arc<Shared>,
    live: Option<Live>,
    ident: Option<Ident>,
}

struct Ident {
    room_id: Uuid,
    user_name: String,
}

struct Live {
    driver: JoinHandle<()>,
    presence: PresenceTracker,
}

impl<S: Store> ChatSync<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            shared: Arc::new(Shared::new()),
            live: None,
            ident: None,
        }
    }

    /// Bulk-loads messages and roster and joins the room, all concurrently,
    /// then goes live. Load failures are recorded, not fatal.
    pub async fn initialize(&mut self, room_id: Uuid, user_name: &str) {
        {
            let mut state = self.shared.write();
            if state.phase != Phase::Idle {
                warn!(phase = ?state.phase, "initialize out of idle ignored");
                return;
            }
            state.phase = Phase::Loading;
        }
        self.ident = Some(Ident {
            room_id,
            user_name: user_name.to_owned(),
        });

        let (messages, roster, joined) = futures_util::future::join3(
            self.store.messages(room_id),
            self.store.participants(room_id),
            self.store.join_room(room_id, user_name),
        )
        .await;

        match messages {
            Ok(messages) => self.shared.load_messages(messages),
            Err(err) => self.shared.record_error(err.into()),
        }
        match roster {
            Ok(roster) => self.shared.replace_participants(roster),
            Err(err) => self.shared.record_error(err.into()),
        }
        if let Err(err) = joined {
            self.shared.record_error(err.into());
        }

        let msg_rx = self.store.watch_messages(room_id).await;
        let part_rx = self.store.watch_participants(room_id).await;

        let driver = tokio::spawn(drive(
            self.store.clone(),
            room_id,
            Arc::clone(&self.shared),
            msg_rx,
            part_rx,
        ));
        let presence =
            PresenceTracker::activate(self.store.clone(), room_id, user_name.to_owned());

        self.live = Some(Live { driver, presence });
        self.shared.set_phase(Phase::Live);
    }

    /// Inserts a trimmed message under the session's display name.
    /// Whitespace-only input is ignored. No local append; the authoritative
    /// copy comes back on the feed.
    pub async fn send_message(&self, text: &str) {
        if self.phase() != Phase::Live {
            return;
        }
        let Some(ident) = &self.ident else { return };

        let content = text.trim();
        if content.is_empty() {
            return;
        }

        if let Err(err) = self
            .store
            .insert_message(ident.room_id, &ident.user_name, content)
            .await
        {
            self.shared.record_error(err.into());
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.read().messages.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared.read().participants.clone()
    }

    /// Most recent error; errors do not stack.
    pub fn last_error(&self) -> Option<SyncError> {
        self.shared.read().last_error.clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.read().phase
    }

    /// Releases both subscriptions, stops the heartbeat and discards state.
    /// Terminal; rejoining takes a fresh instance. In-flight store calls are
    /// not aborted, their results are discarded on arrival.
    pub fn teardown(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        if let Some(mut live) = self.live.take() {
            live.driver.abort();
            live.presence.deactivate();
        }

        let mut state = self.shared.write();
        state.messages.clear();
        state.seen.clear();
        state.participants.clear();
        state.phase = Phase::TornDown;
    }
}

impl<S: Store> Drop for ChatSync<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// The single consumer of both feeds; events are handled one at a time.
async fn drive<S: Store>(
    store: S,
    room_id: Uuid,
    shared: Arc<Shared>,
    mut msg_rx: broadcast::Receiver<Message>,
    mut part_rx: broadcast::Receiver<ParticipantChange>,
) {
    loop {
        tokio::select! {
            event = msg_rx.recv() => match event {
                Ok(message) => shared.append_message(message),
                Err(RecvError::Lagged(dropped)) => {
                    shared.record_error(SyncError::FeedLagged(dropped));
                    // The dropped events are still rows; reload the sequence
                    // so nothing stays missing.
                    match store.messages(room_id).await {
                        Ok(messages) => shared.load_messages(messages),
                        Err(err) => shared.record_error(err.into()),
                    }
                }
                Err(RecvError::Closed) => break,
            },
            event = part_rx.recv() => {
                match event {
                    Ok(change) => debug!(?change, "participant change, refreshing roster"),
                    // lag only means missed refresh triggers; the re-fetch
                    // below covers them all at once
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                match store.participants(room_id).await {
                    Ok(roster) => shared.replace_participants(roster),
                    Err(err) => shared.record_error(err.into()),
                }
            },
        }
    }
}

struct Shared {
    // cleared by teardown; checked at the top of every mutating path
    alive: AtomicBool,
    state: RwLock<RoomState>,
}

#[derive(Default)]
struct RoomState {
    phase: Phase,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    participants: Vec<Participant>,
    last_error: Option<SyncError>,
}

impl Shared {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            state: RwLock::new(RoomState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RoomState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoomState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn append_message(&self, message: Message) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.write();
        if !state.seen.insert(message.id) {
            debug!(id = %message.id, "duplicate message event skipped");
            return;
        }
        state.messages.push(message);
    }

    fn load_messages(&self, messages: Vec<Message>) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.write();
        state.seen = messages.iter().map(|message| message.id).collect();
        state.messages = messages;
    }

    fn replace_participants(&self, roster: Vec<Participant>) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        self.write().participants = roster;
    }

    fn record_error(&self, error: SyncError) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        self.write().last_error = Some(error);
    }

    fn set_phase(&self, phase: Phase) {
        self.write().phase = phase;
    }
}
