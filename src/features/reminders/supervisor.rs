//! # Reminder Supervisor
//!
//! Owns the running reminder processes: starts them, routes signals to them and brings
//! them back after a restart.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Recovery skips broken reminders and repairs rows of finished processes
//! - 1.1.0: Adoption of reminders whose process never started
//! - 1.0.0: Initial release with start, signal and crash recovery

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::checkpoint::{Checkpoint, ExecutionStore, Stage};
use super::model::{ExecutionHandle, ReminderPayload, ReminderStatus, SignalKind};
use super::process::{ProcessContext, ProcessSettings, ReminderProcess};
use super::repository::{Clock, ReminderRepository, SystemClock};
use super::status_sync::StatusSynchronizer;
use crate::core::config::SchedulerSettings;
use crate::features::notifications::NotificationDispatcher;

/// A process currently running in this daemon
struct ActiveProcess {
    handle: ExecutionHandle,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct ReminderSupervisor {
    repository: Arc<dyn ReminderRepository>,
    store: Arc<dyn ExecutionStore>,
    context: Arc<ProcessContext>,
    active: Arc<DashMap<Uuid, ActiveProcess>>,
    completions: broadcast::Sender<(Uuid, ReminderStatus)>,
}

impl ReminderSupervisor {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        store: Arc<dyn ExecutionStore>,
        dispatcher: NotificationDispatcher,
        settings: &SchedulerSettings,
    ) -> Self {
        let context = ProcessContext {
            store: store.clone(),
            status: Arc::new(StatusSynchronizer::new(repository.clone())),
            dispatcher,
            clock: Arc::new(SystemClock),
            settings: ProcessSettings::from_settings(settings),
        };
        let (completions, _) = broadcast::channel(256);

        Self {
            repository,
            store,
            context: Arc::new(context),
            active: Arc::new(DashMap::new()),
            completions,
        }
    }

    /// Replace the wall clock (tests drive time through tokio)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let mut context = (*self.context).clone();
        context.clock = clock;
        self.context = Arc::new(context);
        self
    }

    /// Receive `(reminder_id, status)` whenever a process in this daemon finishes
    pub fn subscribe(&self) -> broadcast::Receiver<(Uuid, ReminderStatus)> {
        self.completions.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, reminder_id: Uuid) -> bool {
        self.active.contains_key(&reminder_id)
    }

    /// Start the process for a reminder. Idempotent: a running or already persisted
    /// process is reused rather than started twice.
    pub async fn start(
        &self,
        reminder_id: Uuid,
        payload: ReminderPayload,
    ) -> Result<ExecutionHandle> {
        if let Some(process) = self.active.get(&reminder_id) {
            debug!("Reminder {reminder_id} already running");
            return Ok(process.handle.clone());
        }

        let checkpoint = match self.store.load_checkpoint(reminder_id).await? {
            Some(existing) if existing.stage.is_finished() => {
                debug!("Reminder {reminder_id} already finished, not restarting");
                return Ok(ExecutionHandle::for_reminder(reminder_id));
            }
            Some(existing) => existing,
            None => {
                let checkpoint =
                    Checkpoint::initial(reminder_id, payload, self.context.clock.now());
                self.store.save_checkpoint(&checkpoint).await?;
                checkpoint
            }
        };

        Ok(self.spawn(checkpoint))
    }

    /// Fire-and-forget delivery of a signal. Signals for finished or unknown processes
    /// are ignored. Returns whether the signal was queued.
    pub async fn signal(&self, handle: &ExecutionHandle, kind: SignalKind) -> Result<bool> {
        let reminder_id = handle.reminder_id()?;

        match self.store.load_checkpoint(reminder_id).await? {
            Some(checkpoint) if !checkpoint.stage.is_finished() => {}
            Some(_) => {
                debug!("Ignoring {kind} for finished reminder {reminder_id}");
                return Ok(false);
            }
            None => {
                warn!("Ignoring {kind} for unknown process {handle}");
                return Ok(false);
            }
        }

        self.store.enqueue_signal(reminder_id, kind).await?;

        // the process may have finished and cleared its queue since the check above
        let finished = self
            .store
            .load_checkpoint(reminder_id)
            .await?
            .is_some_and(|c| c.stage.is_finished());
        if finished {
            self.store.consume_signals(reminder_id, None).await?;
            debug!("Reminder {reminder_id} finished before {kind} arrived");
            return Ok(false);
        }

        if let Some(process) = self.active.get(&reminder_id) {
            process.wake.notify_one();
        }
        info!("Signal {kind} queued for reminder {reminder_id}");
        Ok(true)
    }

    /// Whether a process was ever started for the reminder, running or finished
    pub async fn has_process(&self, reminder_id: Uuid) -> Result<bool> {
        Ok(self.store.load_checkpoint(reminder_id).await?.is_some())
    }

    /// Resume every unfinished process from its checkpoint, then adopt reminders that
    /// never got one. Returns the number of processes started.
    ///
    /// Problems with a single reminder are logged and skipped so they never hold back
    /// the others.
    pub async fn recover(&self) -> Result<usize> {
        match self.reconcile_finished().await {
            Ok(0) => {}
            Ok(n) => info!("Reconciled {n} reminders with their finished processes"),
            Err(e) => error!("Could not reconcile finished processes: {e}"),
        }

        let mut resumed = 0;
        for checkpoint in self.store.active_checkpoints().await? {
            let id = checkpoint.reminder_id;
            if self.is_active(id) {
                continue;
            }

            // the row may have reached a terminal status after the last checkpoint write
            match self.repository.get(id).await {
                Ok(Some(reminder)) if reminder.status.is_terminal() => {
                    let closed = checkpoint.advance(
                        Stage::Finished {
                            status: reminder.status,
                        },
                        self.context.clock.now(),
                    );
                    match self.store.save_checkpoint(&closed).await {
                        Ok(()) => debug!("Closed stale checkpoint of reminder {id}"),
                        Err(e) => warn!("Could not close checkpoint of reminder {id}: {e}"),
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read reminder {id}, resuming from checkpoint: {e}"),
            }

            info!(
                "Resuming reminder {id} from stage {}",
                checkpoint.stage.name()
            );
            self.spawn(checkpoint);
            resumed += 1;
        }

        let adopted = match self.adopt_unscheduled().await {
            Ok(adopted) => adopted,
            Err(e) => {
                error!("Adoption during recovery failed: {e}");
                0
            }
        };
        if resumed + adopted > 0 {
            info!("Recovered {resumed} reminder processes, adopted {adopted}");
        }
        Ok(resumed + adopted)
    }

    /// Write the outcome of finished processes whose terminal status write was lost and
    /// drop signals that arrived after they finished. Returns the number of rows repaired.
    pub async fn reconcile_finished(&self) -> Result<usize> {
        let mut repaired = 0;

        for checkpoint in self.store.finished_checkpoints().await? {
            let id = checkpoint.reminder_id;
            let status = match checkpoint.stage {
                Stage::Finished { status } => status,
                _ => continue,
            };

            match self.store.consume_signals(id, None).await {
                Ok(0) => {}
                Ok(n) => debug!("Dropped {n} late signals of finished reminder {id}"),
                Err(e) => warn!("Could not clear late signals of reminder {id}: {e}"),
            }

            match self.repository.get(id).await {
                Ok(Some(reminder)) if !reminder.status.is_terminal() => {
                    match self.repository.update_status(id, status).await {
                        Ok(()) => {
                            info!("Reminder {id} was left {}, now {status}", reminder.status);
                            repaired += 1;
                        }
                        Err(e) => warn!("Could not write status {status} for reminder {id}: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read reminder {id}: {e}"),
            }
        }

        Ok(repaired)
    }

    /// Start processes for pending reminders whose process never started (e.g. the daemon
    /// died between insert and start, or the start failed)
    pub async fn adopt_unscheduled(&self) -> Result<usize> {
        let mut adopted = 0;

        for reminder in self.repository.list_unscheduled().await? {
            if self.is_active(reminder.id) {
                continue;
            }

            let handle = match self.start(reminder.id, reminder.payload()).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Could not adopt reminder {}: {e}", reminder.id);
                    continue;
                }
            };
            if let Err(e) = self
                .repository
                .update_execution_handle(reminder.id, &handle)
                .await
            {
                warn!("Could not store handle of reminder {}: {e}", reminder.id);
            }
            adopted += 1;
        }

        Ok(adopted)
    }

    /// Periodically adopt unscheduled reminders
    pub async fn run_adoption(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.adopt_unscheduled().await {
                Ok(0) => {}
                Ok(n) => info!("Adopted {n} unscheduled reminders"),
                Err(e) => error!("Adoption sweep failed: {e}"),
            }
        }
    }

    /// Stop all processes. Their checkpoints stay, so [`recover`](Self::recover) resumes them.
    pub fn shutdown(&self) {
        let count = self.active.len();
        for process in self.active.iter() {
            process.task.abort();
        }
        self.active.clear();
        info!("Stopped {count} reminder processes");
    }

    fn spawn(&self, checkpoint: Checkpoint) -> ExecutionHandle {
        let id = checkpoint.reminder_id;

        match self.active.entry(id) {
            Entry::Occupied(existing) => existing.get().handle.clone(),
            Entry::Vacant(slot) => {
                let handle = ExecutionHandle::for_reminder(id);
                let wake = Arc::new(Notify::new());
                let process = ReminderProcess::new(self.context.clone(), checkpoint, wake.clone());

                let active = self.active.clone();
                let completions = self.completions.clone();
                let task = tokio::spawn(async move {
                    let status = process.run().await;
                    active.remove(&id);
                    // no subscribers is fine
                    let _ = completions.send((id, status));
                });

                slot.insert(ActiveProcess {
                    handle: handle.clone(),
                    wake,
                    task,
                });
                handle
            }
        }
    }
}
