use std::sync::Arc;

use dashmap::DashMap;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Message, Participant, Room};
use crate::store::{ParticipantChange, StoreError, StoreResult};

const FEED_CAPACITY: usize = 64;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS participants (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    joined_at INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    UNIQUE (room_id, user_name)
);
";

/// SQLite-backed [`Store`](crate::Store). Change feeds are per-room
/// broadcast channels fed after each successful write; clones share them.
/// Timestamps are stored as unix milliseconds, ids as uuid text.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    msg_feeds: Arc<DashMap<Uuid, broadcast::Sender<Message>>>,
    part_feeds: Arc<DashMap<Uuid, broadcast::Sender<ParticipantChange>>>,
}

impl SqliteStore {
    /// Connect and bootstrap the schema (idempotent).
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self {
            pool,
            msg_feeds: Arc::new(DashMap::new()),
            part_feeds: Arc::new(DashMap::new()),
        })
    }

    /// The underlying pool; flows left to others (room creation, cleanup
    /// jobs) go through here.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn message_feed(&self, room_id: Uuid) -> broadcast::Sender<Message> {
        self.msg_feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    fn participant_feed(&self, room_id: Uuid) -> broadcast::Sender<ParticipantChange> {
        self.part_feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }
}

impl crate::store::Store for SqliteStore {
    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT name, created_by, created_at FROM rooms WHERE id=?")
                .bind(room_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some((name, created_by, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Room {
            id: room_id,
            name,
            created_by,
            created_at: from_ms(created_at)?,
        }))
    }

    async fn messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT id, user_name, content, created_at FROM messages \
             WHERE room_id=? ORDER BY created_at ASC, id ASC",
        )
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, user_name, content, created_at)| {
                Ok(Message {
                    id: parse_id(&id)?,
                    room_id,
                    user_name,
                    content,
                    created_at: from_ms(created_at)?,
                })
            })
            .collect()
    }

    async fn participants(&self, room_id: Uuid) -> StoreResult<Vec<Participant>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT id, user_name, joined_at, last_seen FROM participants \
             WHERE room_id=? ORDER BY joined_at ASC, id ASC",
        )
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, user_name, joined_at, last_seen)| {
                Ok(Participant {
                    id: parse_id(&id)?,
                    room_id,
                    user_name,
                    joined_at: from_ms(joined_at)?,
                    last_seen: from_ms(last_seen)?,
                })
            })
            .collect()
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        user_name: &str,
        content: &str,
    ) -> StoreResult<()> {
        let message = Message {
            id: Uuid::now_v7(),
            room_id,
            user_name: user_name.to_owned(),
            content: content.to_owned(),
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO messages (id, room_id, user_name, content, created_at) \
             VALUES (?,?,?,?,?)",
        )
        .bind(message.id.to_string())
        .bind(room_id.to_string())
        .bind(&message.user_name)
        .bind(&message.content)
        .bind(to_ms(message.created_at))
        .execute(&self.pool)
        .await?;

        let _ = self.message_feed(room_id).send(message);
        Ok(())
    }

    async fn join_room(&self, room_id: Uuid, user_name: &str) -> StoreResult<()> {
        let now = now_ms();
        sqlx::query(
            "INSERT INTO participants (id, room_id, user_name, joined_at, last_seen) \
             VALUES (?,?,?,?,?) \
             ON CONFLICT (room_id, user_name) DO UPDATE SET last_seen=excluded.last_seen",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(room_id.to_string())
        .bind(user_name)
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;

        // revival through the conflict arm still reads as a join downstream
        let _ = self.participant_feed(room_id).send(ParticipantChange::Joined);
        Ok(())
    }

    async fn touch_presence(&self, room_id: Uuid, user_name: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE participants SET last_seen=? WHERE room_id=? AND user_name=?")
            .bind(to_ms(now_ms()))
            .bind(room_id.to_string())
            .bind(user_name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            let _ = self.participant_feed(room_id).send(ParticipantChange::Updated);
        }
        Ok(())
    }

    async fn watch_messages(&self, room_id: Uuid) -> broadcast::Receiver<Message> {
        self.message_feed(room_id).subscribe()
    }

    async fn watch_participants(&self, room_id: Uuid) -> broadcast::Receiver<ParticipantChange> {
        self.participant_feed(room_id).subscribe()
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

fn parse_id(text: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(text).map_err(|err| StoreError::Transport(err.to_string()))
}

// now, truncated to the stored resolution so a written record reads back
// equal to the one put on the feed
fn now_ms() -> OffsetDateTime {
    from_ms(to_ms(OffsetDateTime::now_utc())).expect("current time in storable range")
}

fn to_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_ms(ms: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|err| StoreError::Transport(err.to_string()))
}
