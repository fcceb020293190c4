//! Live message delivery: per-room broadcast channels plus a subscription
//! wrapper that folds deltas into an ordered snapshot.
//!
//! The log's server assigns timestamps but delivery order is whatever the
//! channel produces, so every snapshot is re-sorted by `(created_at, id)`
//! before it reaches a consumer.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    ChatError,
    db::StoredMessage,
    rooms::{RoomCode, msg},
};

pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// Process-wide registry of per-room fan-out channels.
#[derive(Clone, Default)]
pub struct SubscriptionHub {
    channels: Arc<Mutex<HashMap<RoomCode, broadcast::Sender<StoredMessage>>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, code: &RoomCode) -> broadcast::Receiver<StoredMessage> {
        let mut channels = self.channels.lock().expect("subscription hub lock");
        sweep(&mut channels);
        channels
            .entry(code.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fans a freshly appended message out to the room's live receivers.
    /// A room nobody is subscribed to has no channel; the message is already
    /// durable in the log, so there is nothing to do here.
    pub fn publish(&self, code: &RoomCode, message: StoredMessage) {
        let mut channels = self.channels.lock().expect("subscription hub lock");
        sweep(&mut channels);
        if let Some(tx) = channels.get(code) {
            let _ = tx.send(message);
        }
    }
}

/// Reclaims rooms whose last receiver is gone, so quiet rooms do not pin
/// channels forever.
fn sweep(channels: &mut HashMap<RoomCode, broadcast::Sender<StoredMessage>>) {
    channels.retain(|_, tx| tx.receiver_count() > 0);
}

/// One live query over a room's message log. Holds the current ordered
/// snapshot; dropping it releases the receiver, so a connection can never
/// leak more than the subscription it holds.
pub struct Subscription {
    code: RoomCode,
    rx: broadcast::Receiver<StoredMessage>,
    snapshot: Vec<StoredMessage>,
}

impl Subscription {
    /// Subscribes first and loads the initial snapshot second, so an append
    /// racing the open is either in the snapshot or in the channel (or both;
    /// duplicates collapse by id).
    pub async fn open(
        hub: &SubscriptionHub,
        pool: &SqlitePool,
        namespace: &str,
        code: RoomCode,
    ) -> Result<Self, ChatError> {
        let rx = hub.subscribe(&code);
        let snapshot = msg::room_log(pool, namespace, &code).await?;
        Ok(Self { code, rx, snapshot })
    }

    pub fn room(&self) -> &RoomCode {
        &self.code
    }

    pub fn snapshot(&self) -> &[StoredMessage] {
        &self.snapshot
    }

    /// Awaits the next delta and returns the updated full ordered snapshot.
    /// A lagged or closed channel surfaces as `ChatError::Subscription`; the
    /// held snapshot stays as it was.
    pub async fn next_snapshot(&mut self) -> Result<Vec<StoredMessage>, ChatError> {
        let message = self.rx.recv().await?;
        self.apply(message);
        Ok(self.snapshot.clone())
    }

    /// Recovers from lagged delivery by reloading the snapshot from the log.
    pub async fn resync(
        &mut self,
        pool: &SqlitePool,
        namespace: &str,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        self.snapshot = msg::room_log(pool, namespace, &self.code).await?;
        Ok(self.snapshot.clone())
    }

    fn apply(&mut self, message: StoredMessage) {
        if self.snapshot.iter().any(|m| m.id == message.id) {
            return;
        }
        self.snapshot.push(message);
        self.snapshot
            .sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserId;
    use tokio::sync::broadcast::error::RecvError;

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    fn message(id: &str, created_at: i64) -> StoredMessage {
        StoredMessage {
            id: id.to_owned(),
            sender_id: UserId("u1".to_owned()),
            text: format!("m{created_at}"),
            created_at,
        }
    }

    fn open_raw(hub: &SubscriptionHub, code: RoomCode) -> Subscription {
        let rx = hub.subscribe(&code);
        Subscription {
            code,
            rx,
            snapshot: Vec::new(),
        }
    }

    #[tokio::test]
    async fn snapshots_stay_sorted_under_out_of_order_delivery() {
        let hub = SubscriptionHub::new();
        let room = code("AB12CD");
        let mut sub = open_raw(&hub, room.clone());

        hub.publish(&room, message("c", 30));
        hub.publish(&room, message("a", 10));
        hub.publish(&room, message("b", 20));

        sub.next_snapshot().await.unwrap();
        sub.next_snapshot().await.unwrap();
        let snapshot = sub.next_snapshot().await.unwrap();

        let order: Vec<i64> = snapshot.iter().map(|m| m.created_at).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_by_id() {
        let hub = SubscriptionHub::new();
        let room = code("AB12CD");
        let mut sub = open_raw(&hub, room.clone());

        hub.publish(&room, message("b", 10));
        hub.publish(&room, message("a", 10));

        sub.next_snapshot().await.unwrap();
        let snapshot = sub.next_snapshot().await.unwrap();

        let ids: Vec<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_deliveries_collapse_by_id() {
        let hub = SubscriptionHub::new();
        let room = code("AB12CD");
        let mut sub = open_raw(&hub, room.clone());

        hub.publish(&room, message("a", 10));
        hub.publish(&room, message("a", 10));

        sub.next_snapshot().await.unwrap();
        let snapshot = sub.next_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn lagged_delivery_surfaces_as_subscription_error() {
        let hub = SubscriptionHub::new();
        let room = code("AB12CD");
        let mut sub = open_raw(&hub, room.clone());

        for i in 0..(CHANNEL_CAPACITY + 8) {
            hub.publish(&room, message(&format!("m{i}"), i as i64));
        }

        let err = sub.next_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::Subscription(RecvError::Lagged(_))
        ));
        // Last known snapshot is untouched by the failure.
        assert!(sub.snapshot().is_empty());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = SubscriptionHub::new();
        hub.publish(&code("ZZ99ZZ"), message("a", 10));
    }

    #[tokio::test]
    async fn hub_reclaims_rooms_without_receivers() {
        let hub = SubscriptionHub::new();
        let (room_a, room_b) = (code("AB12CD"), code("EF34GH"));

        let rx = hub.subscribe(&room_a);
        drop(rx);

        // Any later subscribe or publish sweeps the dead entry.
        let rx_b = hub.subscribe(&room_b);
        {
            let channels = hub.channels.lock().unwrap();
            assert!(!channels.contains_key(&room_a));
            assert!(channels.contains_key(&room_b));
        }

        drop(rx_b);
        hub.publish(&room_b, message("a", 10));
        assert!(hub.channels.lock().unwrap().is_empty());
    }
}
