use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;

use crate::rooms::RoomCode;

pub type AppResult<T> = Result<T, AppError>;

/// Catch-all for handler plumbing; renders as a bare 500.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Domain failure taxonomy. Every variant is caught at the operation
/// boundary, logged, and leaves client state untouched; none is retried
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("identity bootstrap failed")]
    Auth(#[source] tower_sessions::session::Error),

    #[error("room directory write failed")]
    Write(#[source] sqlx::Error),

    #[error("room lookup failed")]
    Lookup(#[source] sqlx::Error),

    #[error("no room under code {0}")]
    RoomNotFound(RoomCode),

    #[error("could not allocate an unused room code after {0} attempts")]
    CodeExhausted(u32),

    #[error("message append failed")]
    Send(#[source] sqlx::Error),

    #[error("live subscription lapsed")]
    Subscription(#[from] broadcast::error::RecvError),
}
