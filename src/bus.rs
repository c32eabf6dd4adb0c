//! Inter-bot message bus (spec 4.1).
//!
//! Bots never hold direct references to each other. Every `BotMessage`
//! passes through the [`MessageBus`], which fans each message out to every
//! subscriber whose id matches the recipient (or whose id is not the
//! [`TEAM_RECIPIENT`] broadcast target). Subscription is a single mpsc
//! channel per bot, mirroring the observer pipeline's single-receiver
//! background task idiom.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::types::{BotMessage, TEAM_RECIPIENT};

/// Bus-specific failure modes.
#[derive(Debug, Error)]
pub enum BusError {
    /// The named bot has no active subscription.
    #[error("no subscriber registered for bot {0}")]
    UnknownRecipient(String),
}

/// Depth of each subscriber's mailbox before `send` backpressures.
const MAILBOX_CAPACITY: usize = 256;

/// Cap on retained history; oldest entries are dropped once exceeded.
const MAX_HISTORY: usize = 1000;

/// A bot's inbound mailbox handle, returned by [`MessageBus::subscribe`].
pub type Mailbox = mpsc::Receiver<BotMessage>;

/// Static facts about a bot registered with the bus, independent of
/// whether it currently holds a live mailbox subscription.
#[derive(Debug, Clone)]
pub struct BotDescriptor {
    /// Human-readable display name.
    pub name: String,
}

/// Snapshot of a registered bot, as reported by [`MessageBus::list_bots`].
#[derive(Debug, Clone)]
pub struct BotListEntry {
    /// Human-readable display name.
    pub name: String,
    /// Number of messages this bot has sent through the bus.
    pub message_count: u64,
}

struct BotEntry {
    name: String,
    message_count: u64,
}

/// Shared, cloneable handle to the fleet-wide message bus.
#[derive(Clone, Default)]
pub struct MessageBus {
    subscribers: Arc<RwLock<HashMap<String, mpsc::Sender<BotMessage>>>>,
    bots: Arc<RwLock<HashMap<String, BotEntry>>>,
    history: Arc<RwLock<Vec<BotMessage>>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bot's descriptor in the bus's registry.
    ///
    /// Idempotent: registering an id that's already known updates its
    /// name but preserves its accumulated message count. Registration is
    /// independent of [`subscribe`](Self::subscribe) — a bot can be known
    /// to the registry without currently holding a live mailbox.
    pub async fn register_bot(&self, bot_id: impl Into<String>, descriptor: BotDescriptor) {
        let mut bots = self.bots.write().await;
        bots.entry(bot_id.into())
            .and_modify(|entry| entry.name.clone_from(&descriptor.name))
            .or_insert(BotEntry { name: descriptor.name, message_count: 0 });
    }

    /// Register a bot and return its mailbox receiver.
    ///
    /// Re-subscribing an id replaces its previous mailbox; the old receiver
    /// is dropped and stops receiving further traffic.
    pub async fn subscribe(&self, bot_id: impl Into<String>) -> Mailbox {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.subscribers.write().await.insert(bot_id.into(), tx);
        rx
    }

    /// Remove a bot's subscription.
    pub async fn unsubscribe(&self, bot_id: &str) {
        self.subscribers.write().await.remove(bot_id);
    }

    /// Deliver a message to its recipient(s), returning the id assigned
    /// to the message by its sender.
    ///
    /// `recipient_id == `[`TEAM_RECIPIENT`] broadcasts to every subscriber
    /// other than the sender. Any other recipient is delivered to exactly
    /// that subscriber. Every send increments the sender's message count
    /// (auto-registering it if unknown) and appends the message to the
    /// bus's history, regardless of delivery outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownRecipient`] for a point-to-point send
    /// whose recipient has no active subscription. Broadcast sends never
    /// fail on account of individual disconnected subscribers — those are
    /// logged and skipped.
    pub async fn send(&self, message: BotMessage) -> Result<String, BusError> {
        let subscribers = self.subscribers.read().await;

        let result = if message.recipient_id == TEAM_RECIPIENT {
            for (bot_id, tx) in subscribers.iter() {
                if *bot_id == message.sender_id {
                    continue;
                }
                if tx.send(message.clone()).await.is_err() {
                    warn!(bot_id, "dropping broadcast, mailbox closed");
                }
            }
            Ok(())
        } else {
            match subscribers.get(&message.recipient_id) {
                Some(tx) => {
                    if tx.send(message.clone()).await.is_err() {
                        warn!(recipient = %message.recipient_id, "mailbox closed on delivery");
                    }
                    Ok(())
                }
                None => Err(BusError::UnknownRecipient(message.recipient_id.clone())),
            }
        };
        drop(subscribers);

        result?;

        let mut bots = self.bots.write().await;
        bots.entry(message.sender_id.clone())
            .and_modify(|entry| entry.message_count += 1)
            .or_insert(BotEntry { name: message.sender_id.clone(), message_count: 1 });
        drop(bots);

        let mut history = self.history.write().await;
        history.push(message.clone());
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }

        Ok(message.id)
    }

    /// Number of currently-subscribed bots.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Snapshot of every registered bot, keyed by bot id.
    ///
    /// Includes bots registered via [`register_bot`](Self::register_bot)
    /// as well as any bot that has sent at least one message (which
    /// auto-registers it under its own id if it wasn't already known).
    pub async fn list_bots(&self) -> HashMap<String, BotListEntry> {
        self.bots
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), BotListEntry { name: entry.name.clone(), message_count: entry.message_count }))
            .collect()
    }

    /// The most recent `limit` messages sent through the bus, oldest
    /// first. Returns the full retained history when `limit` is `None`.
    pub async fn history(&self, limit: Option<usize>) -> Vec<BotMessage> {
        let history = self.history.read().await;
        match limit {
            Some(limit) if limit < history.len() => history[history.len() - limit..].to_vec(),
            _ => history.clone(),
        }
    }
}

/// Drain a bot's mailbox, invoking `handler` for each message until the bus
/// drops the sender half. Mirrors the observer pipeline's `run_observer`
/// background-task shape.
pub async fn run_mailbox<F, Fut>(mut mailbox: Mailbox, bot_id: &str, mut handler: F)
where
    F: FnMut(BotMessage) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    debug!(bot_id, "mailbox loop started");
    while let Some(message) = mailbox.recv().await {
        handler(message).await;
    }
    debug!(bot_id, "mailbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, MessageKind};

    fn message(sender: &str, recipient: &str) -> BotMessage {
        BotMessage {
            id: new_id(),
            sender_id: sender.to_owned(),
            recipient_id: recipient.to_owned(),
            kind: MessageKind::Request,
            content: "hello".to_owned(),
            context: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn point_to_point_delivery() {
        let bus = MessageBus::new();
        let mut mailbox = bus.subscribe("coordinator").await;
        bus.send(message("research", "coordinator")).await.unwrap();
        let received = mailbox.recv().await.unwrap();
        assert_eq!(received.sender_id, "research");
    }

    #[tokio::test]
    async fn unknown_recipient_errors() {
        let bus = MessageBus::new();
        let err = bus.send(message("research", "ghost")).await.unwrap_err();
        assert!(matches!(err, BusError::UnknownRecipient(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe("a").await;
        let mut b = bus.subscribe("b").await;
        bus.send(message("a", TEAM_RECIPIENT)).await.unwrap();
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_returns_the_message_id() {
        let bus = MessageBus::new();
        bus.subscribe("coordinator").await;
        let msg = message("research", "coordinator");
        let expected_id = msg.id.clone();
        let msg_id = bus.send(msg).await.unwrap();
        assert_eq!(msg_id, expected_id);
    }

    #[tokio::test]
    async fn register_bot_is_idempotent_and_preserves_count() {
        let bus = MessageBus::new();
        bus.subscribe("coordinator").await;
        bus.register_bot("research", BotDescriptor { name: "Research Bot".to_owned() }).await;
        bus.send(message("research", "coordinator")).await.unwrap();

        bus.register_bot("research", BotDescriptor { name: "Research Bot v2".to_owned() }).await;
        let bots = bus.list_bots().await;
        let entry = bots.get("research").unwrap();
        assert_eq!(entry.name, "Research Bot v2");
        assert_eq!(entry.message_count, 1);
    }

    #[tokio::test]
    async fn list_bots_reports_message_counts() {
        let bus = MessageBus::new();
        bus.subscribe("coordinator").await;
        bus.send(message("research", "coordinator")).await.unwrap();
        bus.send(message("research", "coordinator")).await.unwrap();
        bus.send(message("writer", "coordinator")).await.unwrap();

        let bots = bus.list_bots().await;
        assert_eq!(bots.get("research").unwrap().message_count, 2);
        assert_eq!(bots.get("writer").unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn history_respects_limit_and_order() {
        let bus = MessageBus::new();
        bus.subscribe("coordinator").await;
        for _ in 0..5 {
            bus.send(message("research", "coordinator")).await.unwrap();
        }

        let full = bus.history(None).await;
        assert_eq!(full.len(), 5);

        let last_two = bus.history(Some(2)).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].id, full[3].id);
        assert_eq!(last_two[1].id, full[4].id);
    }
}
