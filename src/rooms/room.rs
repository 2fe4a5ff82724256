use thiserror::Error;
use uuid::Uuid;

use crate::db::Room;
use crate::store::{Store, StoreError};

/// One-shot fetch of a room's descriptor. Keeps no state and is safe to
/// retry; a miss is the caller's cue to show "room does not exist".
pub async fn load_room<S: Store>(store: &S, room_id: Uuid) -> Result<Room, RoomError> {
    match store.room(room_id).await? {
        Some(room) => Ok(room),
        None => Err(RoomError::NotFound),
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room does not exist")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}
