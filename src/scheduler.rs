//! Message scheduler
//!
//! Owns every message the server has created: the status machine
//! NOT_SENT → PENDING → FINISHED/CANCELLED, the at-most-one-pending-per-
//! sender rule, the TTL purge after delivery, and the history query.
//!
//! Delivery itself is driven by spawned timer tasks that post `Deliver`
//! back into the engine; because both `begin_delivery` and `cancel` run on
//! the actor and both clear the sender→pending entry as their first
//! observable step, a cancel racing an in-flight delivery resolves to
//! exactly one winner.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::EngineCommand;
use crate::error::AppError;
use crate::session::SessionId;

/// Unique message identifier (newtype pattern)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery target, resolved to a live session (or the broadcast sentinel)
/// when the message is created. Not re-resolved later: a target that
/// disconnects before delivery makes the delivery a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every session live at delivery time
    Broadcast,
    /// One specific session
    Session(SessionId),
}

/// Message delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Created, delivery task not yet run (immediate sends)
    NotSent,
    /// Scheduled with a delay; cancellable until delivery starts
    Pending,
    /// Delivered (or the delivery attempt ran with nobody to hand it to)
    Finished,
    /// Cancelled before delivery
    Cancelled,
}

/// One chat message and its delivery state.
#[derive(Debug)]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    pub sender: SessionId,
    /// Sender's username, snapshotted at creation and refreshed at delivery
    pub sender_name: String,
    pub target: Target,
    pub status: MessageStatus,
    /// Owned handle of the delivery task
    task: Option<JoinHandle<()>>,
}

/// Everything the engine needs to fan a message out.
#[derive(Debug)]
pub struct Delivery {
    pub message_id: MessageId,
    pub text: String,
    pub sender: SessionId,
    pub sender_name: String,
    pub target: Target,
}

/// The message store and pending-send bookkeeping.
#[derive(Debug)]
pub struct Scheduler {
    /// All retained messages in creation order
    messages: Vec<MessageRecord>,
    /// Sender → its single PENDING message, for `cancel` lookup
    pending: HashMap<SessionId, MessageId>,
    /// Retention window for finished/cancelled messages
    message_ttl: Duration,
    /// Upper bound on the `history` reply
    history_limit: usize,
}

impl Scheduler {
    pub fn new(message_ttl: Duration, history_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            pending: HashMap::new(),
            message_ttl,
            history_limit,
        }
    }

    /// Create a message and spawn its delivery task.
    ///
    /// A delay of zero (or none) means immediate delivery: the task posts
    /// `Deliver` without sleeping, so the caller never blocks on it. A
    /// positive delay puts the message in PENDING; a sender with a message
    /// already PENDING is rejected rather than ending up with two timers.
    pub fn schedule(
        &mut self,
        sender: SessionId,
        sender_name: String,
        target: Target,
        text: String,
        delay: Option<u64>,
        cmd_tx: mpsc::Sender<EngineCommand>,
    ) -> Result<MessageId, AppError> {
        let delayed = matches!(delay, Some(seconds) if seconds > 0);
        if delayed && self.pending.contains_key(&sender) {
            return Err(AppError::AlreadyScheduled);
        }

        let id = MessageId::new();
        let task = tokio::spawn(async move {
            if let Some(seconds) = delay.filter(|seconds| *seconds > 0) {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
            }
            let _ = cmd_tx.send(EngineCommand::Deliver { message_id: id }).await;
        });

        if delayed {
            self.pending.insert(sender, id);
        }
        self.messages.push(MessageRecord {
            id,
            text,
            sender,
            sender_name,
            target,
            status: if delayed {
                MessageStatus::Pending
            } else {
                MessageStatus::NotSent
            },
            task: Some(task),
        });
        Ok(id)
    }

    /// Claim a message for delivery.
    ///
    /// Returns `None` when the message is gone or no longer deliverable
    /// (already finished, or cancelled while the `Deliver` command sat in
    /// the queue). On success the sender→pending entry is cleared, the
    /// status moves to FINISHED and the TTL purge is scheduled.
    pub fn begin_delivery(
        &mut self,
        message_id: MessageId,
        cmd_tx: mpsc::Sender<EngineCommand>,
    ) -> Option<Delivery> {
        let ttl = self.message_ttl;
        let record = self.messages.iter_mut().find(|m| m.id == message_id)?;
        match record.status {
            MessageStatus::NotSent | MessageStatus::Pending => {}
            MessageStatus::Finished | MessageStatus::Cancelled => return None,
        }

        if self.pending.get(&record.sender) == Some(&record.id) {
            self.pending.remove(&record.sender);
        }
        record.status = MessageStatus::Finished;
        record.task = None;
        schedule_purge(message_id, ttl, cmd_tx);

        Some(Delivery {
            message_id: record.id,
            text: record.text.clone(),
            sender: record.sender,
            sender_name: record.sender_name.clone(),
            target: record.target,
        })
    }

    /// Record the sender name actually used at delivery time, so history
    /// reflects a rename that happened during the delay window.
    pub fn refresh_sender_name(&mut self, message_id: MessageId, sender_name: &str) {
        if let Some(record) = self.messages.iter_mut().find(|m| m.id == message_id) {
            if record.sender_name != sender_name {
                record.sender_name = sender_name.to_string();
            }
        }
    }

    /// Cancel the sender's pending message.
    ///
    /// Fails with `NoScheduledMessage` when nothing is pending, including
    /// the case where the timer already fired and delivery was claimed
    /// first. On success the timer is aborted, the status moves to
    /// CANCELLED and the message is retained until its TTL purge.
    pub fn cancel(
        &mut self,
        sender: SessionId,
        cmd_tx: mpsc::Sender<EngineCommand>,
    ) -> Result<String, AppError> {
        let ttl = self.message_ttl;
        let message_id = self
            .pending
            .remove(&sender)
            .ok_or(AppError::NoScheduledMessage)?;
        let record = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(AppError::NoScheduledMessage)?;

        if let Some(task) = record.task.take() {
            task.abort();
        }
        record.status = MessageStatus::Cancelled;
        schedule_purge(message_id, ttl, cmd_tx);
        Ok(record.text.clone())
    }

    /// Remove a message from the store once its retention window passes.
    pub fn purge(&mut self, message_id: MessageId) {
        self.messages.retain(|m| m.id != message_id);
    }

    /// The most recent FINISHED messages visible to `viewer`: broadcasts
    /// and messages addressed to it, oldest first, at most `history_limit`.
    pub fn history(&self, viewer: SessionId) -> Vec<String> {
        let visible: Vec<&MessageRecord> = self
            .messages
            .iter()
            .filter(|m| {
                m.status == MessageStatus::Finished
                    && (m.target == Target::Broadcast || m.target == Target::Session(viewer))
            })
            .collect();
        let skip = visible.len().saturating_sub(self.history_limit);
        visible[skip..]
            .iter()
            .map(|m| format!("[{}] {}", m.sender_name, m.text))
            .collect()
    }

    /// The viewer's pending message id, if any (test and handler helper).
    pub fn pending_for(&self, sender: SessionId) -> Option<MessageId> {
        self.pending.get(&sender).copied()
    }

    /// Status lookup by id.
    pub fn status(&self, message_id: MessageId) -> Option<MessageStatus> {
        self.messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.status)
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn schedule_purge(message_id: MessageId, ttl: Duration, cmd_tx: mpsc::Sender<EngineCommand>) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let _ = cmd_tx.send(EngineCommand::Purge { message_id }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (Scheduler, mpsc::Sender<EngineCommand>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
        // Drain timer commands so senders never block in tests.
        tokio::spawn(async move { while cmd_rx.recv().await.is_some() {} });
        (Scheduler::new(Duration::from_secs(3600), 20), cmd_tx)
    }

    #[tokio::test]
    async fn test_immediate_message_is_not_pending() {
        let (mut scheduler, cmd_tx) = scheduler();
        let sender = SessionId::new();

        let id = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "hi".into(),
                None,
                cmd_tx,
            )
            .unwrap();

        assert_eq!(scheduler.status(id), Some(MessageStatus::NotSent));
        assert!(scheduler.pending_for(sender).is_none());
    }

    #[tokio::test]
    async fn test_delayed_message_is_pending_and_exclusive() {
        let (mut scheduler, cmd_tx) = scheduler();
        let sender = SessionId::new();

        let id = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "later".into(),
                Some(30),
                cmd_tx.clone(),
            )
            .unwrap();
        assert_eq!(scheduler.status(id), Some(MessageStatus::Pending));
        assert_eq!(scheduler.pending_for(sender), Some(id));

        let err = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "again".into(),
                Some(30),
                cmd_tx,
            )
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyScheduled));
    }

    #[tokio::test]
    async fn test_cancel_pending_message() {
        let (mut scheduler, cmd_tx) = scheduler();
        let sender = SessionId::new();

        let id = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "later".into(),
                Some(30),
                cmd_tx.clone(),
            )
            .unwrap();

        let text = scheduler.cancel(sender, cmd_tx.clone()).unwrap();
        assert_eq!(text, "later");
        assert_eq!(scheduler.status(id), Some(MessageStatus::Cancelled));
        assert!(scheduler.pending_for(sender).is_none());

        // A late Deliver for the cancelled message is a no-op.
        assert!(scheduler.begin_delivery(id, cmd_tx).is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_pending_fails() {
        let (mut scheduler, cmd_tx) = scheduler();
        let err = scheduler.cancel(SessionId::new(), cmd_tx).unwrap_err();
        assert!(matches!(err, AppError::NoScheduledMessage));
    }

    #[tokio::test]
    async fn test_delivery_claims_exactly_once() {
        let (mut scheduler, cmd_tx) = scheduler();
        let sender = SessionId::new();

        let id = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "hello".into(),
                Some(1),
                cmd_tx.clone(),
            )
            .unwrap();

        let delivery = scheduler.begin_delivery(id, cmd_tx.clone()).unwrap();
        assert_eq!(delivery.text, "hello");
        assert_eq!(scheduler.status(id), Some(MessageStatus::Finished));
        assert!(scheduler.pending_for(sender).is_none());

        // The race loser: cancel after delivery started.
        let err = scheduler.cancel(sender, cmd_tx.clone()).unwrap_err();
        assert!(matches!(err, AppError::NoScheduledMessage));

        // And a duplicate Deliver is also a no-op.
        assert!(scheduler.begin_delivery(id, cmd_tx).is_none());
    }

    #[tokio::test]
    async fn test_history_filters_by_viewer_and_status() {
        let (mut scheduler, cmd_tx) = scheduler();
        let alice = SessionId::new();
        let bob = SessionId::new();
        let carol = SessionId::new();

        let broadcast = scheduler
            .schedule(
                alice,
                "Alice".into(),
                Target::Broadcast,
                "to everyone".into(),
                None,
                cmd_tx.clone(),
            )
            .unwrap();
        let private = scheduler
            .schedule(
                alice,
                "Alice".into(),
                Target::Session(bob),
                "to bob".into(),
                None,
                cmd_tx.clone(),
            )
            .unwrap();
        let cancelled = scheduler
            .schedule(
                bob,
                "Bob".into(),
                Target::Broadcast,
                "never sent".into(),
                Some(30),
                cmd_tx.clone(),
            )
            .unwrap();

        scheduler.begin_delivery(broadcast, cmd_tx.clone()).unwrap();
        scheduler.begin_delivery(private, cmd_tx.clone()).unwrap();
        scheduler.cancel(bob, cmd_tx.clone()).unwrap();
        assert_eq!(scheduler.status(cancelled), Some(MessageStatus::Cancelled));

        assert_eq!(
            scheduler.history(bob),
            vec!["[Alice] to everyone", "[Alice] to bob"]
        );
        // Carol does not see Bob's private message.
        assert_eq!(scheduler.history(carol), vec!["[Alice] to everyone"]);
    }

    #[tokio::test]
    async fn test_history_limit_keeps_most_recent() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
        tokio::spawn(async move { while cmd_rx.recv().await.is_some() {} });
        let mut scheduler = Scheduler::new(Duration::from_secs(3600), 2);
        let alice = SessionId::new();

        for text in ["one", "two", "three"] {
            let id = scheduler
                .schedule(
                    alice,
                    "Alice".into(),
                    Target::Broadcast,
                    text.into(),
                    None,
                    cmd_tx.clone(),
                )
                .unwrap();
            scheduler.begin_delivery(id, cmd_tx.clone()).unwrap();
        }

        assert_eq!(scheduler.history(alice), vec!["[Alice] two", "[Alice] three"]);
    }

    #[tokio::test]
    async fn test_purge_removes_message() {
        let (mut scheduler, cmd_tx) = scheduler();
        let sender = SessionId::new();

        let id = scheduler
            .schedule(
                sender,
                "Alice".into(),
                Target::Broadcast,
                "hi".into(),
                None,
                cmd_tx.clone(),
            )
            .unwrap();
        scheduler.begin_delivery(id, cmd_tx).unwrap();

        scheduler.purge(id);
        assert!(scheduler.is_empty());
        assert!(scheduler.history(sender).is_empty());
    }
}
