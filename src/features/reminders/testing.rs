//! Test doubles shared by the reminder and notification tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::checkpoint::{Checkpoint, ExecutionStore};
use super::model::{
    ExecutionHandle, NewReminder, Reminder, ReminderPage, ReminderStatus, SignalKind,
};
use super::repository::{Clock, ReminderRepository};
use crate::database::Database;
use crate::features::notifications::NotificationChannel;

pub fn sample_reminder(target: &str) -> NewReminder {
    NewReminder {
        owner_id: "owner-1".to_string(),
        title: "Take out the bins".to_string(),
        description: Some("Green one this week".to_string()),
        due_at: Utc::now(),
        notification_target: target.to_string(),
        requires_ack: false,
        repeat_interval_minutes: 0,
    }
}

/// Wall clock driven by tokio's (pausable) time
pub struct PausedClock {
    origin: tokio::time::Instant,
    base: DateTime<Utc>,
}

impl PausedClock {
    pub fn new() -> Self {
        // whole seconds so stored timestamps compare equal after a round-trip
        let base = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        Self {
            origin: tokio::time::Instant::now(),
            base,
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

enum Behaviour {
    Succeed,
    FailFirst(u32),
    FailCalls(Vec<u32>),
    AlwaysFail,
    Hang,
}

/// Channel that records what it was asked to send
pub struct RecordingChannel {
    behaviour: Behaviour,
    calls: AtomicU32,
    sent: Mutex<Vec<(String, String)>>,
    sent_at: Mutex<Vec<tokio::time::Instant>>,
}

impl RecordingChannel {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            sent_at: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::with(Behaviour::Succeed)
    }

    pub fn failing_first(failures: u32) -> Self {
        Self::with(Behaviour::FailFirst(failures))
    }

    /// Fail exactly the listed (1-based) calls
    pub fn failing_calls(calls: &[u32]) -> Self {
        Self::with(Behaviour::FailCalls(calls.to_vec()))
    }

    pub fn always_failing() -> Self {
        Self::with(Behaviour::AlwaysFail)
    }

    pub fn hanging() -> Self {
        Self::with(Behaviour::Hang)
    }

    /// Send attempts, successful or not
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful deliveries as `(target, text)`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Tokio instants of successful deliveries
    pub fn sent_at(&self) -> Vec<tokio::time::Instant> {
        self.sent_at.lock().unwrap().clone()
    }

    fn deliver(&self, target: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        self.sent_at
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, target: &str, text: &str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behaviour {
            Behaviour::Succeed => self.deliver(target, text),
            Behaviour::FailFirst(failures) if call <= *failures => {
                Err(anyhow!("simulated outage (call {call})"))
            }
            Behaviour::FailCalls(calls) if calls.contains(&call) => {
                Err(anyhow!("simulated outage (call {call})"))
            }
            Behaviour::FailFirst(_) | Behaviour::FailCalls(_) => self.deliver(target, text),
            Behaviour::AlwaysFail => Err(anyhow!("simulated outage (call {call})")),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

/// In-memory repository whose writes can be switched to fail
pub struct FlakyRepository {
    rows: Mutex<HashMap<Uuid, Reminder>>,
    failing: AtomicBool,
    writes: Mutex<Vec<(Uuid, ReminderStatus)>>,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful status writes in order
    pub fn status_writes(&self) -> Vec<(Uuid, ReminderStatus)> {
        self.writes.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("repository unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReminderRepository for FlakyRepository {
    async fn create(&self, reminder: NewReminder) -> Result<Reminder> {
        self.check()?;
        let now = Utc::now();
        let row = Reminder {
            id: Uuid::new_v4(),
            owner_id: reminder.owner_id,
            title: reminder.title,
            description: reminder.description,
            due_at: reminder.due_at,
            notification_target: reminder.notification_target,
            requires_ack: reminder.requires_ack,
            repeat_interval_minutes: reminder.repeat_interval_minutes,
            status: ReminderStatus::Pending,
            execution_handle: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>> {
        self.check()?;
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: ReminderStatus) -> Result<()> {
        self.check()?;
        self.writes.lock().unwrap().push((id, status));
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.status = status;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_execution_handle(&self, id: Uuid, handle: &ExecutionHandle) -> Result<bool> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.execution_handle.is_none() => {
                row.execution_handle = Some(handle.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Reminder>> {
        self.check()?;
        let mut rows: Vec<Reminder> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.due_at);
        Ok(rows)
    }

    async fn list_by_owner_paged(
        &self,
        owner_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ReminderPage> {
        let rows = self.list_by_owner(owner_id).await?;
        let total = rows.len();
        let items = rows
            .into_iter()
            .skip(page.saturating_sub(1) * page_size)
            .take(page_size)
            .collect();
        Ok(ReminderPage::new(items, page, page_size, total))
    }

    async fn list_unscheduled(&self) -> Result<Vec<Reminder>> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == ReminderStatus::Pending && r.execution_handle.is_none())
            .cloned()
            .collect())
    }
}

/// Database-backed execution store whose checkpoint writes can be switched to fail
pub struct FlakyStore {
    inner: Database,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionStore for FlakyStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("checkpoint storage unavailable"));
        }
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn load_checkpoint(&self, reminder_id: Uuid) -> Result<Option<Checkpoint>> {
        self.inner.load_checkpoint(reminder_id).await
    }

    async fn active_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.inner.active_checkpoints().await
    }

    async fn finished_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.inner.finished_checkpoints().await
    }

    async fn enqueue_signal(&self, reminder_id: Uuid, kind: SignalKind) -> Result<()> {
        self.inner.enqueue_signal(reminder_id, kind).await
    }

    async fn pending_signals(&self, reminder_id: Uuid) -> Result<Vec<SignalKind>> {
        self.inner.pending_signals(reminder_id).await
    }

    async fn consume_signals(&self, reminder_id: Uuid, kind: Option<SignalKind>) -> Result<usize> {
        self.inner.consume_signals(reminder_id, kind).await
    }
}
