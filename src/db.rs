use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{identity::UserId, rooms::RoomCode};

/// A directory entry. Written exactly once, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub code: RoomCode,
    pub creator_id: UserId,
    pub created_at: i64,
}

/// One log entry. Immutable once written; `created_at` is stamped by the
/// server at append time and is the sole ordering key (id breaks ties).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: i64,
}

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            namespace TEXT NOT NULL,
            code TEXT NOT NULL,
            creator_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, code)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            room_code TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_room
         ON messages (namespace, room_code, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Server-assigned timestamp: unix milliseconds at write-commit time.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
