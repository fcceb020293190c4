use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::SqlitePool;
use tower_sessions::Session;
use tracing::info;

use crate::{
    AppResult, ChatError,
    config::Config,
    db::{self, Room},
    identity::{self, UserId},
    rooms::RoomCode,
};

/// Attempts per creation before giving up on finding an unused code.
const CODE_ATTEMPTS: u32 = 8;

pub async fn create_room(
    pool: &SqlitePool,
    namespace: &str,
    creator: &UserId,
) -> Result<Room, ChatError> {
    create_room_with(pool, namespace, creator, RoomCode::generate).await
}

/// Creation with an injectable code source. The composite primary key turns a
/// code collision into a unique violation, which we answer by regenerating;
/// a concurrent creation of the same code therefore keeps the first writer's
/// record intact.
pub async fn create_room_with(
    pool: &SqlitePool,
    namespace: &str,
    creator: &UserId,
    mut next_code: impl FnMut() -> RoomCode,
) -> Result<Room, ChatError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = next_code();
        let created_at = db::now_millis();

        let inserted = sqlx::query(
            "INSERT INTO rooms (namespace, code, creator_id, created_at) VALUES (?,?,?,?)",
        )
        .bind(namespace)
        .bind(code.as_str())
        .bind(creator.as_str())
        .bind(created_at)
        .execute(pool)
        .await;

        match inserted {
            Ok(_) => {
                return Ok(Room {
                    code,
                    creator_id: creator.clone(),
                    created_at,
                });
            }
            Err(e) if e.as_database_error().is_some_and(|db| db.is_unique_violation()) => {
                continue;
            }
            Err(e) => return Err(ChatError::Write(e)),
        }
    }

    Err(ChatError::CodeExhausted(CODE_ATTEMPTS))
}

pub async fn lookup_room(
    pool: &SqlitePool,
    namespace: &str,
    code: &RoomCode,
) -> Result<Room, ChatError> {
    let row: Option<(String, i64)> =
        sqlx::query_as("SELECT creator_id, created_at FROM rooms WHERE namespace=? AND code=?")
            .bind(namespace)
            .bind(code.as_str())
            .fetch_optional(pool)
            .await
            .map_err(ChatError::Lookup)?;

    let Some((creator_id, created_at)) = row else {
        return Err(ChatError::RoomNotFound(code.clone()));
    };

    Ok(Room {
        code: code.clone(),
        creator_id: UserId(creator_id),
        created_at,
    })
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<Json<Room>> {
    let user = identity::current_user(&session).await?;
    let room = create_room(&pool, &config.namespace, &user).await?;
    info!(code = %room.code, creator = %room.creator_id, "room created");
    Ok(Json(room))
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn room_info(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    Path(code): Path<String>,
) -> AppResult<Response> {
    let Some(code) = RoomCode::parse(&code) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    match lookup_room(&pool, &config.namespace, &code).await {
        Ok(room) => Ok(Json(room).into_response()),
        Err(ChatError::RoomNotFound(code)) => {
            info!(%code, "probe for unknown room");
            Ok(StatusCode::NOT_FOUND.into_response())
        }
        Err(e) => Err(e.into()),
    }
}
