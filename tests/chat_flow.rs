use quickroom::{
    ChatError, db,
    identity::UserId,
    rooms::{RoomCode, directory, msg},
    session::ChatSession,
    sync::{Subscription, SubscriptionHub},
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const NS: &str = "test";

async fn mem_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init(&pool).await.unwrap();
    pool
}

fn user(s: &str) -> UserId {
    UserId(s.to_owned())
}

fn code(s: &str) -> RoomCode {
    RoomCode::parse(s).unwrap()
}

#[tokio::test]
async fn create_room_allocates_a_well_formed_code() {
    let pool = mem_pool().await;
    let creator = user("u1");

    let room = directory::create_room(&pool, NS, &creator).await.unwrap();
    assert_eq!(room.code.as_str().len(), RoomCode::LEN);
    assert!(
        room.code
            .as_str()
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    );

    let found = directory::lookup_room(&pool, NS, &room.code).await.unwrap();
    assert_eq!(found, room);
}

#[tokio::test]
async fn lookup_of_unknown_code_is_room_not_found() {
    let pool = mem_pool().await;

    let err = directory::lookup_room(&pool, NS, &code("ZZ99ZZ"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::RoomNotFound(c) if c == code("ZZ99ZZ")));
}

#[tokio::test]
async fn colliding_code_is_regenerated() {
    let pool = mem_pool().await;

    directory::create_room_with(&pool, NS, &user("u1"), || code("AB12CD"))
        .await
        .unwrap();

    // Second creation draws the taken code first, then a fresh one.
    let mut draws = [code("AB12CD"), code("EF34GH")].into_iter();
    let room = directory::create_room_with(&pool, NS, &user("u2"), || draws.next().unwrap())
        .await
        .unwrap();
    assert_eq!(room.code, code("EF34GH"));

    // First writer's record survived the collision.
    let original = directory::lookup_room(&pool, NS, &code("AB12CD")).await.unwrap();
    assert_eq!(original.creator_id, user("u1"));
}

#[tokio::test]
async fn code_generation_gives_up_after_bounded_attempts() {
    let pool = mem_pool().await;

    directory::create_room_with(&pool, NS, &user("u1"), || code("AB12CD"))
        .await
        .unwrap();

    let err = directory::create_room_with(&pool, NS, &user("u2"), || code("AB12CD"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::CodeExhausted(_)));
}

#[tokio::test]
async fn send_delivers_exactly_one_trimmed_message() {
    let pool = mem_pool().await;
    let hub = SubscriptionHub::new();
    let sender = user("u1");

    let room = directory::create_room(&pool, NS, &sender).await.unwrap();
    let mut sub = Subscription::open(&hub, &pool, NS, room.code.clone())
        .await
        .unwrap();
    assert!(sub.snapshot().is_empty());

    let mut chat = ChatSession::new();
    chat.authenticate(sender.clone());
    chat.enter_room(room.code.clone());
    chat.set_draft("  hello  ");

    let (target, text) = chat.outgoing().unwrap();
    let stored = msg::append_message(&pool, NS, &target, &sender, &text)
        .await
        .unwrap();
    chat.clear_draft();
    hub.publish(&target, stored);

    let snapshot = sub.next_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text, "hello");
    assert_eq!(snapshot[0].sender_id, sender);
    assert_eq!(chat.draft(), "");
}

#[tokio::test]
async fn blank_draft_or_no_subscription_writes_nothing() {
    let pool = mem_pool().await;
    let sender = user("u1");
    let room = directory::create_room(&pool, NS, &sender).await.unwrap();

    // No subscription yet: even a real draft stays put.
    let mut chat = ChatSession::new();
    chat.authenticate(sender.clone());
    chat.set_draft("hello");
    assert_eq!(chat.outgoing(), None);

    // Live subscription, blank draft: still a no-op.
    chat.enter_room(room.code.clone());
    chat.set_draft("   ");
    assert_eq!(chat.outgoing(), None);
    assert_eq!(chat.draft(), "   ");

    let log = msg::room_log(&pool, NS, &room.code).await.unwrap();
    assert!(log.is_empty());
}

#[tokio::test]
async fn room_log_is_scoped_to_room_and_namespace() {
    let pool = mem_pool().await;
    let sender = user("u1");

    let room = directory::create_room(&pool, NS, &sender).await.unwrap();
    let other = directory::create_room(&pool, NS, &sender).await.unwrap();

    msg::append_message(&pool, NS, &room.code, &sender, "here")
        .await
        .unwrap();
    msg::append_message(&pool, NS, &other.code, &sender, "elsewhere")
        .await
        .unwrap();
    msg::append_message(&pool, "other-ns", &room.code, &sender, "other app")
        .await
        .unwrap();

    let log = msg::room_log(&pool, NS, &room.code).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].text, "here");
}

#[tokio::test]
async fn two_clients_converge_on_the_same_ordered_log() {
    let pool = mem_pool().await;
    let hub = SubscriptionHub::new();
    let (alice, bob) = (user("u1"), user("u2"));

    // Alice creates the room and says hello.
    let room = directory::create_room(&pool, NS, &alice).await.unwrap();
    let mut alice_sub = Subscription::open(&hub, &pool, NS, room.code.clone())
        .await
        .unwrap();

    let hello = msg::append_message(&pool, NS, &room.code, &alice, "hello")
        .await
        .unwrap();
    hub.publish(&room.code, hello);
    let seen = alice_sub.next_snapshot().await.unwrap();
    assert_eq!(seen.len(), 1);

    // Bob joins by code; his initial snapshot already holds the history.
    let joined = directory::lookup_room(&pool, NS, &room.code).await.unwrap();
    let mut bob_sub = Subscription::open(&hub, &pool, NS, joined.code.clone())
        .await
        .unwrap();
    assert_eq!(bob_sub.snapshot().len(), 1);

    let hi = msg::append_message(&pool, NS, &room.code, &bob, "hi")
        .await
        .unwrap();
    hub.publish(&room.code, hi);

    let alice_view = alice_sub.next_snapshot().await.unwrap();
    let bob_view = bob_sub.next_snapshot().await.unwrap();

    assert_eq!(alice_view, bob_view);
    let texts: Vec<&str> = alice_view.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "hi"]);
    assert!(alice_view[0].created_at <= alice_view[1].created_at);
}
