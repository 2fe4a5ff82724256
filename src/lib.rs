pub mod config;
pub mod db;
pub mod rooms;
pub mod store;

pub use config::{Config, ConfigError};
pub use db::{Message, Participant, Room};
pub use rooms::presence::{
    HEARTBEAT_PERIOD, ONLINE_WINDOW, PresenceTracker, is_online, online_participants,
};
pub use rooms::room::{RoomError, load_room};
pub use rooms::sync::{ChatSync, Phase, SyncError};
pub use store::sqlite::SqliteStore;
pub use store::{ParticipantChange, Store, StoreError, StoreResult};
