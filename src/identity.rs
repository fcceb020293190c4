use std::fmt;

use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::debug;
use uuid::Uuid;

use crate::ChatError;

pub const USER_ID_KEY: &str = "user_id";

/// Opaque, stable per-session identifier handed out by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the session's identity, minting a fresh anonymous one the first
/// time. The UNAUTHENTICATED -> AUTHENTICATED transition happens at most once
/// per session and is terminal; there is no sign-out path.
pub async fn current_user(session: &Session) -> Result<UserId, ChatError> {
    if let Some(id) = session
        .get::<String>(USER_ID_KEY)
        .await
        .map_err(ChatError::Auth)?
    {
        return Ok(UserId(id));
    }

    let id = Uuid::now_v7().to_string();
    session
        .insert(USER_ID_KEY, &id)
        .await
        .map_err(ChatError::Auth)?;
    debug!(user = %id, "established anonymous identity");

    Ok(UserId(id))
}
