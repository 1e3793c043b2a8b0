//! Per-process view of the durable signal queue.
//!
//! Signals live in the execution store so they survive restarts; the in-memory [`Notify`]
//! only shortens the wait for signals sent from inside this process. Signals written by
//! other processes are picked up on the next poll.

use anyhow::Result;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use super::checkpoint::ExecutionStore;
use super::model::SignalKind;

/// Which signals a wait reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    CancelOnly,
    CancelOrAcknowledge,
}

pub struct SignalInbox {
    reminder_id: Uuid,
    store: Arc<dyn ExecutionStore>,
    wake: Arc<Notify>,
}

impl SignalInbox {
    pub fn new(reminder_id: Uuid, store: Arc<dyn ExecutionStore>, wake: Arc<Notify>) -> Self {
        Self {
            reminder_id,
            store,
            wake,
        }
    }

    /// Consume the highest-priority pending signal the caller listens for.
    /// Cancel beats Acknowledge; unaccepted kinds stay queued.
    pub async fn take(&self, listen: Listen) -> Result<Option<SignalKind>> {
        let pending = self.store.pending_signals(self.reminder_id).await?;

        let kind = if pending.contains(&SignalKind::Cancel) {
            SignalKind::Cancel
        } else if listen == Listen::CancelOrAcknowledge && pending.contains(&SignalKind::Acknowledge)
        {
            SignalKind::Acknowledge
        } else {
            return Ok(None);
        };

        let consumed = self.store.consume_signals(self.reminder_id, Some(kind)).await?;
        debug!(
            "Reminder {} received {kind} ({consumed} queued)",
            self.reminder_id
        );
        Ok(Some(kind))
    }

    /// Sleep until woken by an in-process signal or until the next poll is due
    pub async fn wait(&self, poll_interval: Duration) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    /// Drop everything still queued; used once the process is terminal
    pub async fn discard_all(&self) -> Result<usize> {
        self.store.consume_signals(self.reminder_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    async fn inbox() -> (SignalInbox, Arc<Database>, Arc<Notify>) {
        let db = Arc::new(Database::new(":memory:").await.unwrap());
        let wake = Arc::new(Notify::new());
        let inbox = SignalInbox::new(Uuid::new_v4(), db.clone(), wake.clone());
        (inbox, db, wake)
    }

    #[tokio::test]
    async fn test_cancel_wins_over_acknowledge() {
        let (inbox, db, _) = inbox().await;
        db.enqueue_signal(inbox.reminder_id, SignalKind::Acknowledge)
            .await
            .unwrap();
        db.enqueue_signal(inbox.reminder_id, SignalKind::Cancel)
            .await
            .unwrap();

        assert_eq!(
            inbox.take(Listen::CancelOrAcknowledge).await.unwrap(),
            Some(SignalKind::Cancel)
        );
        assert_eq!(
            inbox.take(Listen::CancelOrAcknowledge).await.unwrap(),
            Some(SignalKind::Acknowledge)
        );
        assert_eq!(inbox.take(Listen::CancelOrAcknowledge).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_acknowledge_kept_until_listened_for() {
        let (inbox, db, _) = inbox().await;
        db.enqueue_signal(inbox.reminder_id, SignalKind::Acknowledge)
            .await
            .unwrap();

        assert_eq!(inbox.take(Listen::CancelOnly).await.unwrap(), None);
        assert_eq!(
            inbox.take(Listen::CancelOrAcknowledge).await.unwrap(),
            Some(SignalKind::Acknowledge)
        );
    }

    #[tokio::test]
    async fn test_duplicates_consumed_together() {
        let (inbox, db, _) = inbox().await;
        for _ in 0..3 {
            db.enqueue_signal(inbox.reminder_id, SignalKind::Cancel)
                .await
                .unwrap();
        }

        assert_eq!(
            inbox.take(Listen::CancelOnly).await.unwrap(),
            Some(SignalKind::Cancel)
        );
        assert_eq!(inbox.take(Listen::CancelOnly).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_notify() {
        let (inbox, _, wake) = inbox().await;
        wake.notify_one();

        let started = tokio::time::Instant::now();
        inbox.wait(Duration::from_secs(60)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_poll_interval() {
        let (inbox, _, _) = inbox().await;

        let started = tokio::time::Instant::now();
        inbox.wait(Duration::from_secs(5)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
