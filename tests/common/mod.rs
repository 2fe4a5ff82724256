#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use roomsync::{Message, Participant, ParticipantChange, Room, Store, StoreError, StoreResult};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

const FEED_CAPACITY: usize = 64;

/// In-memory [`Store`] with the same feed semantics as the sqlite adapter,
/// plus knobs the flow tests need: fail the next insert, count heartbeat
/// touches, replay a feed event.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
    msg_feeds: Arc<DashMap<Uuid, broadcast::Sender<Message>>>,
    part_feeds: Arc<DashMap<Uuid, broadcast::Sender<ParticipantChange>>>,
}

#[derive(Default)]
struct Inner {
    rooms: Vec<Room>,
    messages: Vec<Message>,
    participants: Vec<Participant>,
    touches: u64,
    fail_next_insert: bool,
    fail_touches: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            msg_feeds: Arc::new(DashMap::new()),
            part_feeds: Arc::new(DashMap::new()),
        }
    }

    pub fn add_room(&self, name: &str) -> Room {
        let room = Room {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            created_by: "Anonymous".to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.lock().unwrap().rooms.push(room.clone());
        room
    }

    /// How many presence touches have landed, across all rooms.
    pub fn touches(&self) -> u64 {
        self.inner.lock().unwrap().touches
    }

    pub fn fail_next_insert(&self) {
        self.inner.lock().unwrap().fail_next_insert = true;
    }

    pub fn set_fail_touches(&self, fail: bool) {
        self.inner.lock().unwrap().fail_touches = fail;
    }

    /// Pushes a message event on the feed without storing anything, as a
    /// replayed or duplicated delivery would.
    pub fn emit_message_event(&self, message: Message) {
        let _ = self.msg_feed(message.room_id).send(message);
    }

    fn msg_feed(&self, room_id: Uuid) -> broadcast::Sender<Message> {
        self.msg_feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    fn part_feed(&self, room_id: Uuid) -> broadcast::Sender<ParticipantChange> {
        self.part_feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }
}

impl Store for MemStore {
    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rooms.iter().find(|room| room.id == room_id).cloned())
    }

    async fn messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>> {
        let inner = self.inner.lock().unwrap();
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|message| message.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| (message.created_at, message.id));
        Ok(messages)
    }

    async fn participants(&self, room_id: Uuid) -> StoreResult<Vec<Participant>> {
        let inner = self.inner.lock().unwrap();
        let mut roster: Vec<Participant> = inner
            .participants
            .iter()
            .filter(|participant| participant.room_id == room_id)
            .cloned()
            .collect();
        roster.sort_by_key(|participant| (participant.joined_at, participant.id));
        Ok(roster)
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        user_name: &str,
        content: &str,
    ) -> StoreResult<()> {
        let message = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_next_insert {
                inner.fail_next_insert = false;
                return Err(StoreError::Transport("injected insert failure".to_owned()));
            }
            let message = Message {
                id: Uuid::now_v7(),
                room_id,
                user_name: user_name.to_owned(),
                content: content.to_owned(),
                created_at: OffsetDateTime::now_utc(),
            };
            inner.messages.push(message.clone());
            message
        };

        let _ = self.msg_feed(room_id).send(message);
        Ok(())
    }

    async fn join_room(&self, room_id: Uuid, user_name: &str) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner
                .participants
                .iter_mut()
                .find(|p| p.room_id == room_id && p.user_name == user_name)
            {
                Some(existing) => existing.last_seen = now,
                None => inner.participants.push(Participant {
                    id: Uuid::now_v7(),
                    room_id,
                    user_name: user_name.to_owned(),
                    joined_at: now,
                    last_seen: now,
                }),
            }
        }

        let _ = self.part_feed(room_id).send(ParticipantChange::Joined);
        Ok(())
    }

    async fn touch_presence(&self, room_id: Uuid, user_name: &str) -> StoreResult<()> {
        let touched = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_touches {
                return Err(StoreError::Transport("injected touch failure".to_owned()));
            }
            match inner
                .participants
                .iter_mut()
                .find(|p| p.room_id == room_id && p.user_name == user_name)
            {
                Some(existing) => {
                    existing.last_seen = OffsetDateTime::now_utc();
                    true
                }
                None => false,
            }
        };

        if touched {
            self.inner.lock().unwrap().touches += 1;
            let _ = self.part_feed(room_id).send(ParticipantChange::Updated);
        }
        Ok(())
    }

    async fn watch_messages(&self, room_id: Uuid) -> broadcast::Receiver<Message> {
        self.msg_feed(room_id).subscribe()
    }

    async fn watch_participants(&self, room_id: Uuid) -> broadcast::Receiver<ParticipantChange> {
        self.part_feed(room_id).subscribe()
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
