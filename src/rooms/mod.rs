pub mod directory;
pub mod msg;
mod ws;

use std::fmt;

use axum::{
    Router,
    routing::{get, post},
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(directory::new_room))
        .route("/{code}", get(directory::room_info))
        .route("/ws", get(ws::chat_ws))
}

/// Short shareable room handle: six uppercase alphanumeric characters drawn
/// uniformly at random. Uniqueness is enforced by the directory, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub const LEN: usize = 6;
    const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..Self::LEN)
            .map(|_| Self::ALPHABET[rng.random_range(0..Self::ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalizes user input (trim, uppercase) and rejects anything that is
    /// not a well-formed code.
    pub fn parse(input: &str) -> Option<Self> {
        let code = input.trim().to_uppercase();
        if code.len() != Self::LEN || !code.bytes().all(|b| Self::ALPHABET.contains(&b)) {
            return None;
        }
        Some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
