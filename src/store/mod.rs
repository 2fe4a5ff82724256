pub mod sqlite;

use std::future::Future;

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{Message, Participant, Room};

pub type StoreResult<T> = Result<T, StoreError>;

/// What a participant-feed notification says happened. Consumers re-fetch
/// the roster on any of these, so the kind only feeds logs and tests.
/// `Left` is for rows pruned outside this crate; nothing in here emits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Joined,
    Updated,
    Left,
}

/// The durable store and its live change feed, scoped per room. Constructed
/// by the consumer and handed in; nothing here holds a process-wide client.
/// Methods are desugared async so the returned futures are `Send`.
pub trait Store: Clone + Send + Sync + 'static {
    /// Point lookup; `None` on a miss, callers decide whether that is fatal.
    fn room(&self, room_id: Uuid) -> impl Future<Output = StoreResult<Option<Room>>> + Send;

    /// All messages of a room, `created_at` ascending.
    fn messages(&self, room_id: Uuid) -> impl Future<Output = StoreResult<Vec<Message>>> + Send;

    /// All participants of a room, `joined_at` ascending.
    fn participants(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = StoreResult<Vec<Participant>>> + Send;

    /// Insert a message; the store assigns id and `created_at`. The inserted
    /// record is not returned; the authoritative copy arrives on the feed.
    fn insert_message(
        &self,
        room_id: Uuid,
        user_name: &str,
        content: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Insert-or-update on the `(room_id, user_name)` conflict key, setting
    /// `last_seen` to now.
    fn join_room(
        &self,
        room_id: Uuid,
        user_name: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Refresh `last_seen` for an existing participant; a missing row is a
    /// quiet no-op.
    fn touch_presence(
        &self,
        room_id: Uuid,
        user_name: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn watch_messages(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = broadcast::Receiver<Message>> + Send;

    fn watch_participants(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = broadcast::Receiver<ParticipantChange>> + Send;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Any lower-level failure, stringified at the backend boundary so the
    /// contract stays backend-agnostic.
    #[error("store request failed: {0}")]
    Transport(String),
}
