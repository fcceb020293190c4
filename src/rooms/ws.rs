use std::future::pending;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_sessions::Session;
use tracing::{debug, info, warn};

use crate::{
    AppResult, AppState, ChatError,
    db::StoredMessage,
    identity::{self, UserId},
    rooms::{RoomCode, directory, msg},
    session::{ChatSession, Effect},
    sync::Subscription,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    CreateRoom,
    JoinRoom { code: String },
    SendMessage { text: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Room { code: &'a RoomCode },
    Snapshot { messages: &'a [StoredMessage] },
}

/// One socket per client session. Identity must resolve before the upgrade;
/// nothing else runs without it.
#[axum::debug_handler]
pub(crate) async fn chat_ws(
    State(state): State<AppState>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user = identity::current_user(&session).await?;
    Ok(ws.on_upgrade(move |socket| connection(state, user, socket)))
}

/// The single-threaded session event loop: reacts to client frames and to
/// live-query deliveries, never blocking on either. Dropping out of the loop
/// drops the subscription receiver, which is the unsubscribe.
async fn connection(state: AppState, user: UserId, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let namespace = state.config.namespace.clone();
    let mut chat = ChatSession::new();
    let mut live: Option<Subscription> = None;

    let effects = chat.authenticate(user.clone());
    if let Err(e) = apply_effects(&state, &namespace, effects, &mut live).await {
        warn!(error = %e, "subscription bootstrap failed");
        chat.subscription_lost();
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                let Ok(frame) = serde_json::from_slice::<ClientFrame>(&frame.into_data()) else {
                    continue;
                };
                if !handle_frame(&state, &namespace, &user, &mut chat, &mut live, &mut sink, frame).await {
                    break;
                }
            }
            delta = next_delta(&mut live) => {
                match delta {
                    Ok(snapshot) => {
                        if !push(&mut sink, ServerFrame::Snapshot { messages: &snapshot }).await {
                            break;
                        }
                    }
                    Err(ChatError::Subscription(RecvError::Lagged(missed))) => {
                        warn!(missed, "live delivery lagged, resyncing from the log");
                        if let Some(sub) = live.as_mut() {
                            match sub.resync(&state.pool, &namespace).await {
                                Ok(snapshot) => {
                                    if !push(&mut sink, ServerFrame::Snapshot { messages: &snapshot }).await {
                                        break;
                                    }
                                }
                                // Last delivered snapshot stays on screen.
                                Err(e) => warn!(error = %e, "resync failed"),
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "live subscription ended");
                        live = None;
                        chat.subscription_lost();
                    }
                }
            }
        }
    }
}

async fn next_delta(live: &mut Option<Subscription>) -> Result<Vec<StoredMessage>, ChatError> {
    match live {
        Some(sub) => sub.next_snapshot().await,
        None => pending().await,
    }
}

/// Returns false once the peer is gone. Every domain failure is logged here
/// and the session keeps its prior state; no error frames go out.
async fn handle_frame(
    state: &AppState,
    namespace: &str,
    user: &UserId,
    chat: &mut ChatSession,
    live: &mut Option<Subscription>,
    sink: &mut SplitSink<WebSocket, Message>,
    frame: ClientFrame,
) -> bool {
    match frame {
        ClientFrame::CreateRoom => {
            let room = match directory::create_room(&state.pool, namespace, user).await {
                Ok(room) => room,
                Err(e) => {
                    warn!(error = %e, "room creation failed");
                    return true;
                }
            };
            info!(code = %room.code, creator = %user, "room created");
            enter(state, namespace, chat, live, sink, room.code).await
        }
        ClientFrame::JoinRoom { code } => {
            chat.set_join_input(code);
            let Some(code) = RoomCode::parse(chat.join_input()) else {
                debug!("ignoring join with empty or malformed code");
                return true;
            };
            match directory::lookup_room(&state.pool, namespace, &code).await {
                Ok(room) => enter(state, namespace, chat, live, sink, room.code).await,
                Err(e @ ChatError::RoomNotFound(_)) => {
                    info!(error = %e, "join rejected");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "room lookup failed");
                    true
                }
            }
        }
        ClientFrame::SendMessage { text } => {
            chat.set_draft(text);
            let Some((code, text)) = chat.outgoing() else {
                return true;
            };
            // The state container and the held receiver must agree before
            // anything is written.
            if !live.as_ref().is_some_and(|sub| *sub.room() == code) {
                return true;
            }
            match msg::append_message(&state.pool, namespace, &code, user, &text).await {
                Ok(stored) => {
                    chat.clear_draft();
                    state.hub.publish(&code, stored);
                }
                // Draft is kept so the user can retry.
                Err(e) => warn!(error = %e, "message send failed"),
            }
            true
        }
    }
}

/// Activates a directory-confirmed room: swap the subscription per the
/// session's effects, then echo the room and its current snapshot.
async fn enter(
    state: &AppState,
    namespace: &str,
    chat: &mut ChatSession,
    live: &mut Option<Subscription>,
    sink: &mut SplitSink<WebSocket, Message>,
    code: RoomCode,
) -> bool {
    let effects = chat.enter_room(code.clone());
    if let Err(e) = apply_effects(state, namespace, effects, live).await {
        warn!(error = %e, "subscription switch failed");
        chat.subscription_lost();
        return true;
    }
    if !push(sink, ServerFrame::Room { code: &code }).await {
        return false;
    }
    match live.as_ref() {
        Some(sub) => {
            push(sink, ServerFrame::Snapshot { messages: sub.snapshot() }).await
        }
        None => true,
    }
}

async fn apply_effects(
    state: &AppState,
    namespace: &str,
    effects: Vec<Effect>,
    live: &mut Option<Subscription>,
) -> Result<(), ChatError> {
    for effect in effects {
        match effect {
            Effect::Unsubscribe(code) => {
                if live.as_ref().is_some_and(|sub| *sub.room() == code) {
                    *live = None;
                }
            }
            Effect::Subscribe(code) => {
                *live =
                    Some(Subscription::open(&state.hub, &state.pool, namespace, code).await?);
            }
        }
    }
    Ok(())
}

async fn push(sink: &mut SplitSink<WebSocket, Message>, frame: ServerFrame<'_>) -> bool {
    let Ok(payload) = serde_json::to_string(&frame) else {
        return false;
    };
    sink.send(Message::Text(payload.into())).await.is_ok()
}
