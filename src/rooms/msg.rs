use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    ChatError,
    db::{self, StoredMessage},
    identity::UserId,
    rooms::RoomCode,
};

/// Appends one message to the room's log, stamping the server-side creation
/// time. The caller is responsible for trimming; text arrives here as it will
/// be stored.
pub async fn append_message(
    pool: &SqlitePool,
    namespace: &str,
    code: &RoomCode,
    sender: &UserId,
    text: &str,
) -> Result<StoredMessage, ChatError> {
    let message = StoredMessage {
        id: Uuid::now_v7().to_string(),
        sender_id: sender.clone(),
        text: text.to_owned(),
        created_at: db::now_millis(),
    };

    sqlx::query(
        "INSERT INTO messages (id, namespace, room_code, sender_id, text, created_at)
         VALUES (?,?,?,?,?,?)",
    )
    .bind(&message.id)
    .bind(namespace)
    .bind(code.as_str())
    .bind(message.sender_id.as_str())
    .bind(&message.text)
    .bind(message.created_at)
    .execute(pool)
    .await
    .map_err(ChatError::Send)?;

    Ok(message)
}

/// Full log for one room, ascending by server-assigned time. UUIDv7 ids sort
/// lexicographically in generation order, so they make a stable tie-break.
pub async fn room_log(
    pool: &SqlitePool,
    namespace: &str,
    code: &RoomCode,
) -> Result<Vec<StoredMessage>, ChatError> {
    let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT id, sender_id, text, created_at FROM messages
         WHERE namespace=? AND room_code=?
         ORDER BY created_at ASC, id ASC",
    )
    .bind(namespace)
    .bind(code.as_str())
    .fetch_all(pool)
    .await
    .map_err(ChatError::Lookup)?;

    Ok(rows
        .into_iter()
        .map(|(id, sender_id, text, created_at)| StoredMessage {
            id,
            sender_id: UserId(sender_id),
            text,
            created_at,
        })
        .collect())
}
