//! # Reminder Process
//!
//! The durable state machine behind one reminder:
//!
//! ```text
//! Waiting ──due──▶ Dispatching ──sent──▶ Finished(sent)
//!    │                  │    └──ack required + interval──▶ Confirming ──ack──▶ Finished(sent)
//!    │                  └──failed──▶ Finished(failed)          │  ▲
//!    │                                                         │  └── re-dispatch on each tick
//!    └──cancel (any non-terminal stage)──▶ Finished(cancelled) └──ceiling──▶ Finished(sent|failed)
//! ```
//!
//! Every transition is checkpointed before the next wait starts, so a process can be
//! resumed from its last checkpoint after a restart. Cancel always wins over Acknowledge.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Configurable outcome at the confirming ceiling
//! - 1.0.0: Initial release

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use super::checkpoint::{Checkpoint, ExecutionStore, Stage};
use super::model::{ReminderStatus, SignalKind};
use super::repository::Clock;
use super::signals::{Listen, SignalInbox};
use super::status_sync::StatusSynchronizer;
use crate::core::config::{CeilingOutcome, SchedulerSettings};
use crate::features::notifications::{
    AttemptLedger, DispatchError, Notification, NotificationDispatcher,
};

#[derive(Error, Debug)]
pub enum ProcessError {
    /// Checkpoint or signal storage failed; the process cannot continue safely
    #[error("scheduling substrate failure: {0}")]
    Substrate(#[from] anyhow::Error),
}

/// Process tuning taken from [`SchedulerSettings`]
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub confirm_ceiling: chrono::Duration,
    pub ceiling_outcome: CeilingOutcome,
    pub signal_poll: Duration,
}

impl ProcessSettings {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            confirm_ceiling: settings.confirm_ceiling(),
            ceiling_outcome: settings.confirm_ceiling_outcome,
            signal_poll: settings.signal_poll_interval(),
        }
    }
}

/// Everything a process shares with its siblings
#[derive(Clone)]
pub struct ProcessContext {
    pub store: Arc<dyn ExecutionStore>,
    pub status: Arc<StatusSynchronizer>,
    pub dispatcher: NotificationDispatcher,
    pub clock: Arc<dyn Clock>,
    pub settings: ProcessSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Elapsed,
    Cancelled,
    Acknowledged,
}

/// Writes the attempt counter into the checkpoint before each send
struct CheckpointLedger<'a> {
    store: &'a dyn ExecutionStore,
    clock: &'a dyn Clock,
    checkpoint: &'a Checkpoint,
    occasion: u32,
    confirming_since: Option<DateTime<Utc>>,
}

#[async_trait]
impl AttemptLedger for CheckpointLedger<'_> {
    async fn record_attempt(&self, attempt: u32) -> Result<()> {
        let stage = Stage::Dispatching {
            occasion: self.occasion,
            attempts: attempt,
            confirming_since: self.confirming_since,
        };
        self.store
            .save_checkpoint(&self.checkpoint.advance(stage, self.clock.now()))
            .await
    }
}

pub struct ReminderProcess {
    context: Arc<ProcessContext>,
    inbox: SignalInbox,
    checkpoint: Checkpoint,
}

impl ReminderProcess {
    /// `checkpoint` must already be persisted
    pub fn new(context: Arc<ProcessContext>, checkpoint: Checkpoint, wake: Arc<Notify>) -> Self {
        let inbox = SignalInbox::new(checkpoint.reminder_id, context.store.clone(), wake);
        Self {
            context,
            inbox,
            checkpoint,
        }
    }

    fn reminder_id(&self) -> Uuid {
        self.checkpoint.reminder_id
    }

    /// Drive the process to a terminal status
    pub async fn run(mut self) -> ReminderStatus {
        let id = self.reminder_id();
        info!(
            "Reminder {id} process running from stage {}",
            self.checkpoint.stage.name()
        );

        if !self.checkpoint.stage.is_finished() {
            self.context
                .status
                .record(id, ReminderStatus::Processing)
                .await;
        }

        let status = match self.drive().await {
            Ok(status) => status,
            Err(e) => {
                error!("Reminder {id} failed: {e}");
                ReminderStatus::Failed
            }
        };

        self.finish(status).await
    }

    async fn drive(&mut self) -> Result<ReminderStatus, ProcessError> {
        loop {
            let next = match self.checkpoint.stage.clone() {
                Stage::Waiting { due_at } => self.wait_for_due(due_at).await?,
                Stage::Dispatching {
                    occasion,
                    attempts,
                    confirming_since,
                } => {
                    self.dispatch(occasion, attempts, confirming_since)
                        .await?
                }
                Stage::Confirming {
                    since,
                    next_at,
                    occasions,
                } => self.confirm(since, next_at, occasions).await?,
                Stage::Finished { status } => return Ok(status),
            };
            self.transition(next).await?;
        }
    }

    /// Persist the next stage before acting on it
    async fn transition(&mut self, stage: Stage) -> Result<(), ProcessError> {
        debug!(
            "Reminder {} {} -> {}",
            self.reminder_id(),
            self.checkpoint.stage.name(),
            stage.name()
        );
        let next = self.checkpoint.advance(stage, self.context.clock.now());
        self.context.store.save_checkpoint(&next).await?;
        self.checkpoint = next;
        Ok(())
    }

    async fn wait_for_due(&self, due_at: DateTime<Utc>) -> Result<Stage, ProcessError> {
        match self.wait_until(due_at, Listen::CancelOnly).await? {
            WaitOutcome::Cancelled => Ok(finished(ReminderStatus::Cancelled)),
            _ => {
                let target = &self.checkpoint.payload.notification_target;
                if let Err(e) = self.context.dispatcher.check_target(target) {
                    warn!("Reminder {} not dispatched: {e}", self.reminder_id());
                    return Ok(finished(ReminderStatus::Failed));
                }
                Ok(Stage::Dispatching {
                    occasion: 1,
                    attempts: 0,
                    confirming_since: None,
                })
            }
        }
    }

    async fn dispatch(
        &self,
        occasion: u32,
        attempts: u32,
        confirming_since: Option<DateTime<Utc>>,
    ) -> Result<Stage, ProcessError> {
        let id = self.reminder_id();
        let notification = Notification::from_payload(id, &self.checkpoint.payload);
        let ledger = CheckpointLedger {
            store: self.context.store.as_ref(),
            clock: self.context.clock.as_ref(),
            checkpoint: &self.checkpoint,
            occasion,
            confirming_since,
        };

        let result = self
            .context
            .dispatcher
            .dispatch_resumed(&notification, attempts, &ledger)
            .await;

        // a cancel that arrived mid-dispatch still wins
        if self.inbox.take(Listen::CancelOnly).await?.is_some() {
            info!("Reminder {id} cancelled during dispatch");
            return Ok(finished(ReminderStatus::Cancelled));
        }

        let interval = self.checkpoint.payload.repeat_interval();
        match (result, interval, confirming_since) {
            (Err(DispatchError::Ledger(e)), _, _) => Err(ProcessError::Substrate(e)),
            (Ok(_), None, _) => Ok(finished(ReminderStatus::Sent)),
            (Ok(_), Some(interval), since) => {
                let now = self.context.clock.now();
                let since = since.unwrap_or(now);
                Ok(Stage::Confirming {
                    since,
                    next_at: self.next_confirm_at(since, now, interval),
                    occasions: occasion,
                })
            }
            (Err(e), _, None) => {
                warn!("Reminder {id} delivery failed: {e}");
                Ok(finished(ReminderStatus::Failed))
            }
            (Err(e), Some(interval), Some(since)) => {
                warn!("Reminder {id} repeat delivery {occasion} failed, still waiting for ack: {e}");
                let now = self.context.clock.now();
                Ok(Stage::Confirming {
                    since,
                    next_at: self.next_confirm_at(since, now, interval),
                    occasions: occasion,
                })
            }
            // confirming without an interval cannot be produced by this machine
            (Err(e), None, Some(_)) => {
                warn!("Reminder {id} delivery failed: {e}");
                Ok(finished(ReminderStatus::Failed))
            }
        }
    }

    async fn confirm(
        &self,
        since: DateTime<Utc>,
        next_at: DateTime<Utc>,
        occasions: u32,
    ) -> Result<Stage, ProcessError> {
        let id = self.reminder_id();
        match self.wait_until(next_at, Listen::CancelOrAcknowledge).await? {
            WaitOutcome::Cancelled => Ok(finished(ReminderStatus::Cancelled)),
            WaitOutcome::Acknowledged => {
                info!("Reminder {id} acknowledged after {occasions} deliveries");
                Ok(finished(ReminderStatus::Sent))
            }
            WaitOutcome::Elapsed => {
                let ceiling_at = since + self.context.settings.confirm_ceiling;
                if self.context.clock.now() >= ceiling_at {
                    let status = match self.context.settings.ceiling_outcome {
                        CeilingOutcome::Sent => ReminderStatus::Sent,
                        CeilingOutcome::Failed => ReminderStatus::Failed,
                    };
                    info!("Reminder {id} never acknowledged after {occasions} deliveries, giving up as {status}");
                    return Ok(finished(status));
                }
                Ok(Stage::Dispatching {
                    occasion: occasions + 1,
                    attempts: 0,
                    confirming_since: Some(since),
                })
            }
        }
    }

    /// Next re-dispatch, never past the ceiling
    fn next_confirm_at(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        interval: chrono::Duration,
    ) -> DateTime<Utc> {
        (now + interval).min(since + self.context.settings.confirm_ceiling)
    }

    /// Sleep until `deadline` unless a signal the caller listens for arrives first.
    /// Pending signals are checked before the deadline, so a queued cancel beats an elapsed timer.
    async fn wait_until(
        &self,
        deadline: DateTime<Utc>,
        listen: Listen,
    ) -> Result<WaitOutcome, ProcessError> {
        loop {
            match self.inbox.take(listen).await? {
                Some(SignalKind::Cancel) => return Ok(WaitOutcome::Cancelled),
                Some(SignalKind::Acknowledge) => return Ok(WaitOutcome::Acknowledged),
                None => {}
            }

            let remaining = (deadline - self.context.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Ok(WaitOutcome::Elapsed);
            }

            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.inbox.wait(self.context.settings.signal_poll) => {}
            }
        }
    }

    /// Persist the terminal state, mirror it to the row and drop leftover signals
    async fn finish(&mut self, status: ReminderStatus) -> ReminderStatus {
        let id = self.reminder_id();

        if !self.checkpoint.stage.is_finished() {
            let last = self
                .checkpoint
                .advance(finished(status), self.context.clock.now());
            if let Err(e) = self.context.store.save_checkpoint(&last).await {
                error!("Could not checkpoint terminal status of reminder {id}: {e}");
            }
            self.checkpoint = last;
        }

        self.context.status.record(id, status).await;

        match self.inbox.discard_all().await {
            Ok(0) => {}
            Ok(n) => debug!("Reminder {id} ignored {n} signals after finishing"),
            Err(e) => warn!("Could not clear signals of reminder {id}: {e}"),
        }
        self.context.status.forget(id);

        info!("Reminder {id} finished as {status}");
        status
    }
}

fn finished(status: ReminderStatus) -> Stage {
    Stage::Finished { status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::features::notifications::RetryPolicy;
    use crate::features::reminders::model::ReminderPayload;
    use crate::features::reminders::repository::ReminderRepository;
    use crate::features::reminders::testing::{
        sample_reminder, FlakyStore, PausedClock, RecordingChannel,
    };

    struct Harness {
        db: Arc<Database>,
        store: Arc<dyn ExecutionStore>,
        channel: Arc<RecordingChannel>,
        context: Arc<ProcessContext>,
    }

    async fn harness_with(
        channel: RecordingChannel,
        store: Option<Arc<dyn ExecutionStore>>,
        settings: SchedulerSettings,
    ) -> Harness {
        let db = Arc::new(Database::new(":memory:").await.unwrap());
        let store: Arc<dyn ExecutionStore> = match store {
            Some(store) => store,
            None => db.clone(),
        };
        let channel = Arc::new(channel);
        let context = Arc::new(ProcessContext {
            store: store.clone(),
            status: Arc::new(StatusSynchronizer::new(db.clone())),
            dispatcher: NotificationDispatcher::new(
                channel.clone(),
                RetryPolicy::from_settings(&settings),
            ),
            clock: Arc::new(PausedClock::new()),
            settings: ProcessSettings::from_settings(&settings),
        });
        Harness {
            db,
            store,
            channel,
            context,
        }
    }

    async fn harness(channel: RecordingChannel) -> Harness {
        harness_with(channel, None, SchedulerSettings::default()).await
    }

    impl Harness {
        async fn process(&self, due_in: chrono::Duration, ack_every: u32) -> (ReminderProcess, Uuid) {
            let mut new = sample_reminder("42");
            new.due_at = self.context.clock.now() + due_in;
            new.requires_ack = ack_every > 0;
            new.repeat_interval_minutes = ack_every;
            let reminder = self.db.create(new).await.unwrap();

            let checkpoint =
                Checkpoint::initial(reminder.id, reminder.payload(), self.context.clock.now());
            self.store.save_checkpoint(&checkpoint).await.unwrap();
            let process =
                ReminderProcess::new(self.context.clone(), checkpoint, Arc::new(Notify::new()));
            (process, reminder.id)
        }

        async fn row_status(&self, id: Uuid) -> ReminderStatus {
            self.db.get(id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_once_reminder_sent_at_due_time() {
        let h = harness(RecordingChannel::new()).await;
        let (process, id) = h.process(chrono::Duration::minutes(30), 0).await;

        let started = tokio::time::Instant::now();
        assert_eq!(process.run().await, ReminderStatus::Sent);

        assert_eq!(started.elapsed(), Duration::from_secs(30 * 60));
        assert_eq!(h.channel.calls(), 1);
        assert_eq!(h.row_status(id).await, ReminderStatus::Sent);
        let checkpoint = h.db.load_checkpoint(id).await.unwrap().unwrap();
        assert_eq!(
            checkpoint.stage,
            Stage::Finished {
                status: ReminderStatus::Sent
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_due_reminder_dispatches_immediately() {
        let h = harness(RecordingChannel::new()).await;
        let (process, _) = h.process(chrono::Duration::hours(-2), 0).await;

        let started = tokio::time::Instant::now();
        assert_eq!(process.run().await, ReminderStatus::Sent);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(h.channel.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_target_fails_without_sending() {
        let h = harness(RecordingChannel::new()).await;
        let mut new = sample_reminder("   ");
        new.due_at = h.context.clock.now();
        let reminder = h.db.create(new).await.unwrap();
        let checkpoint = Checkpoint::initial(reminder.id, reminder.payload(), h.context.clock.now());
        h.store.save_checkpoint(&checkpoint).await.unwrap();

        let process = ReminderProcess::new(h.context.clone(), checkpoint, Arc::new(Notify::new()));
        assert_eq!(process.run().await, ReminderStatus::Failed);
        assert_eq!(h.channel.calls(), 0);
        assert_eq!(h.row_status(reminder.id).await, ReminderStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_delivery_fails() {
        let h = harness(RecordingChannel::always_failing()).await;
        let (process, id) = h.process(chrono::Duration::zero(), 0).await;

        assert_eq!(process.run().await, ReminderStatus::Failed);
        assert_eq!(h.channel.calls(), 5);
        assert_eq!(h.row_status(id).await, ReminderStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_cancel_beats_elapsed_due_time() {
        let h = harness(RecordingChannel::new()).await;
        let (process, id) = h.process(chrono::Duration::zero(), 0).await;
        h.store.enqueue_signal(id, SignalKind::Cancel).await.unwrap();

        assert_eq!(process.run().await, ReminderStatus::Cancelled);
        assert_eq!(h.channel.calls(), 0);
        assert!(h.store.pending_signals(id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_before_delivery_is_held_for_confirming() {
        let h = harness(RecordingChannel::new()).await;
        let (process, id) = h.process(chrono::Duration::minutes(10), 15).await;
        h.store
            .enqueue_signal(id, SignalKind::Acknowledge)
            .await
            .unwrap();

        assert_eq!(process.run().await, ReminderStatus::Sent);
        // delivered once, then the held ack ended the confirming loop
        assert_eq!(h.channel.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_reminder_stops_at_ceiling_with_failed() {
        let settings = SchedulerSettings {
            confirm_ceiling_minutes: 30,
            confirm_ceiling_outcome: CeilingOutcome::Failed,
            ..SchedulerSettings::default()
        };
        let h = harness_with(RecordingChannel::new(), None, settings).await;
        let (process, id) = h.process(chrono::Duration::zero(), 10).await;

        let started = tokio::time::Instant::now();
        assert_eq!(process.run().await, ReminderStatus::Failed);
        // t=0, 10m, 20m, then the ceiling at 30m ends the loop
        assert_eq!(h.channel.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30 * 60));
        assert_eq!(h.row_status(id).await, ReminderStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_repeat_delivery_keeps_confirming() {
        let settings = SchedulerSettings {
            max_attempts: 1,
            confirm_ceiling_minutes: 20,
            ..SchedulerSettings::default()
        };
        let h = harness_with(RecordingChannel::failing_calls(&[2]), None, settings).await;
        let (process, id) = h.process(chrono::Duration::zero(), 5).await;

        assert_eq!(process.run().await, ReminderStatus::Sent);
        // t=0 ok, 5m fails, 10m and 15m ok, ceiling at 20m
        assert_eq!(h.channel.calls(), 4);
        assert_eq!(h.channel.sent().len(), 3);
        assert_eq!(h.row_status(id).await, ReminderStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_confirming_checkpoint() {
        let h = harness(RecordingChannel::new()).await;
        let now = h.context.clock.now();
        let mut new = sample_reminder("42");
        new.requires_ack = true;
        new.repeat_interval_minutes = 60;
        let reminder = h.db.create(new).await.unwrap();
        let payload: ReminderPayload = reminder.payload();

        // nine deliveries so far, the ceiling is 1h away
        let checkpoint = Checkpoint {
            reminder_id: reminder.id,
            payload,
            stage: Stage::Confirming {
                since: now - chrono::Duration::hours(9),
                next_at: now + chrono::Duration::minutes(30),
                occasions: 9,
            },
            updated_at: now,
        };
        h.store.save_checkpoint(&checkpoint).await.unwrap();

        let process = ReminderProcess::new(h.context.clone(), checkpoint, Arc::new(Notify::new()));
        let started = tokio::time::Instant::now();
        assert_eq!(process.run().await, ReminderStatus::Sent);
        // one re-dispatch at +30m, then the ceiling at +60m
        assert_eq!(h.channel.calls(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(60 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_failure_ends_failed() {
        let db = Database::new(":memory:").await.unwrap();
        let store = Arc::new(FlakyStore::new(db));
        let h = harness_with(
            RecordingChannel::new(),
            Some(store.clone() as Arc<dyn ExecutionStore>),
            SchedulerSettings::default(),
        )
        .await;
        let (process, id) = h.process(chrono::Duration::minutes(5), 0).await;

        store.set_failing(true);
        assert_eq!(process.run().await, ReminderStatus::Failed);
        assert_eq!(h.channel.calls(), 0);
        assert_eq!(h.row_status(id).await, ReminderStatus::Failed);
    }
}
