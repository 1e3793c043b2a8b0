//! # Database
//!
//! SQLite storage for reminder rows, process checkpoints and the durable signal queue.
//! The connection lives behind a mutex that is only held for the duration of one query;
//! no lock is ever held across an `.await`.
//!
//! - **Version**: 1.3.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.3.0: Paged owner listing, undecodable checkpoints are skipped instead of failing the query
//! - 1.2.0: Durable signal queue (`reminder_signals`)
//! - 1.1.0: Process checkpoints for crash recovery
//! - 1.0.0: Initial release with reminder rows

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sqlite::{Connection, State, Statement};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::features::reminders::checkpoint::{Checkpoint, ExecutionStore};
use crate::features::reminders::model::{
    ExecutionHandle, NewReminder, Reminder, ReminderPage, ReminderStatus, SignalKind,
};
use crate::features::reminders::repository::ReminderRepository;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reminders (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    due_at TEXT NOT NULL,
    notification_target TEXT NOT NULL,
    requires_ack INTEGER NOT NULL DEFAULT 0,
    repeat_interval_minutes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    execution_handle TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reminders_owner ON reminders (owner_id, due_at);
CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders (status);

CREATE TABLE IF NOT EXISTS reminder_checkpoints (
    reminder_id TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reminder_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reminder_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL,
    consumed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_signals_pending ON reminder_signals (reminder_id, consumed_at);
";

const REMINDER_COLUMNS: &str = "id, owner_id, title, description, due_at, notification_target, \
     requires_ack, repeat_interval_minutes, status, execution_handle, created_at, updated_at";

/// Shared handle to the SQLite database
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    /// `:memory:` gives a private in-memory database.
    pub async fn new(path: &str) -> Result<Self> {
        let mut connection = sqlite::open(path)?;
        connection.set_busy_timeout(5_000)?;
        if path != ":memory:" {
            connection.execute("PRAGMA journal_mode = WAL;")?;
        }
        connection.execute(SCHEMA)?;

        info!("Opened reminder database at {path}");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run raw SQL, for tests that need to damage stored state
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn insert_reminder(&self, reminder: &Reminder) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(format!(
            "INSERT INTO reminders ({REMINDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))?;
        stmt.bind((1, reminder.id.to_string().as_str()))?;
        stmt.bind((2, reminder.owner_id.as_str()))?;
        stmt.bind((3, reminder.title.as_str()))?;
        stmt.bind((4, reminder.description.as_deref()))?;
        stmt.bind((5, format_time(reminder.due_at).as_str()))?;
        stmt.bind((6, reminder.notification_target.as_str()))?;
        stmt.bind((7, reminder.requires_ack as i64))?;
        stmt.bind((8, reminder.repeat_interval_minutes as i64))?;
        stmt.bind((9, reminder.status.to_string().as_str()))?;
        stmt.bind((10, reminder.execution_handle.as_ref().map(|h| h.as_str())))?;
        stmt.bind((11, format_time(reminder.created_at).as_str()))?;
        stmt.bind((12, format_time(reminder.updated_at).as_str()))?;
        while let State::Row = stmt.next()? {}
        Ok(())
    }

    fn select_reminders(&self, filter: &str, param: Option<&str>) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders {filter}"
        ))?;
        if let Some(value) = param {
            stmt.bind((1, value))?;
        }

        let mut reminders = Vec::new();
        while let State::Row = stmt.next()? {
            reminders.push(read_reminder(&stmt)?);
        }
        Ok(reminders)
    }

    fn set_status(&self, id: Uuid, status: ReminderStatus) -> Result<usize> {
        let conn = self.lock()?;
        // terminal rows are never rewritten
        let mut stmt = conn.prepare(
            "UPDATE reminders SET status = ?, updated_at = ?
             WHERE id = ? AND status != ? AND status NOT IN ('sent', 'cancelled', 'failed')",
        )?;
        let status = status.to_string();
        stmt.bind((1, status.as_str()))?;
        stmt.bind((2, format_time(Utc::now()).as_str()))?;
        stmt.bind((3, id.to_string().as_str()))?;
        stmt.bind((4, status.as_str()))?;
        while let State::Row = stmt.next()? {}
        Ok(conn.change_count())
    }

    fn set_execution_handle(&self, id: Uuid, handle: &ExecutionHandle) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "UPDATE reminders SET execution_handle = ?, updated_at = ?
             WHERE id = ? AND (execution_handle IS NULL OR execution_handle = '')",
        )?;
        stmt.bind((1, handle.as_str()))?;
        stmt.bind((2, format_time(Utc::now()).as_str()))?;
        stmt.bind((3, id.to_string().as_str()))?;
        while let State::Row = stmt.next()? {}
        Ok(conn.change_count())
    }

    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let state = serde_json::to_string(checkpoint)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "INSERT INTO reminder_checkpoints (reminder_id, stage, state, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(reminder_id) DO UPDATE SET
                stage = excluded.stage, state = excluded.state, updated_at = excluded.updated_at",
        )?;
        stmt.bind((1, checkpoint.reminder_id.to_string().as_str()))?;
        stmt.bind((2, checkpoint.stage.name()))?;
        stmt.bind((3, state.as_str()))?;
        stmt.bind((4, format_time(checkpoint.updated_at).as_str()))?;
        while let State::Row = stmt.next()? {}
        Ok(())
    }

    fn select_checkpoints(&self, filter: &str, param: Option<&str>) -> Result<Vec<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(format!(
            "SELECT reminder_id, state FROM reminder_checkpoints {filter}"
        ))?;
        if let Some(value) = param {
            stmt.bind((1, value))?;
        }

        let mut checkpoints = Vec::new();
        while let State::Row = stmt.next()? {
            let state = stmt.read::<String, _>("state")?;
            match serde_json::from_str(&state) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => {
                    let id = stmt.read::<String, _>("reminder_id")?;
                    error!("Skipping undecodable checkpoint of reminder {id}: {e}");
                }
            }
        }
        Ok(checkpoints)
    }

    fn select_owner_page(
        &self,
        owner_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE owner_id = ?
             ORDER BY due_at ASC LIMIT ? OFFSET ?"
        ))?;
        stmt.bind((1, owner_id))?;
        stmt.bind((2, limit as i64))?;
        stmt.bind((3, offset as i64))?;

        let mut reminders = Vec::new();
        while let State::Row = stmt.next()? {
            reminders.push(read_reminder(&stmt)?);
        }
        Ok(reminders)
    }

    fn count_by_owner(&self, owner_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT COUNT(*) AS total FROM reminders WHERE owner_id = ?")?;
        stmt.bind((1, owner_id))?;

        let mut total = 0;
        while let State::Row = stmt.next()? {
            total = stmt.read::<i64, _>("total")?.max(0) as usize;
        }
        Ok(total)
    }

    fn insert_signal(&self, reminder_id: Uuid, kind: SignalKind) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "INSERT INTO reminder_signals (reminder_id, kind, created_at) VALUES (?, ?, ?)",
        )?;
        stmt.bind((1, reminder_id.to_string().as_str()))?;
        stmt.bind((2, kind.to_string().as_str()))?;
        stmt.bind((3, format_time(Utc::now()).as_str()))?;
        while let State::Row = stmt.next()? {}
        Ok(())
    }

    fn select_pending_signals(&self, reminder_id: Uuid) -> Result<Vec<SignalKind>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT kind FROM reminder_signals
             WHERE reminder_id = ? AND consumed_at IS NULL",
        )?;
        stmt.bind((1, reminder_id.to_string().as_str()))?;

        let mut kinds = Vec::new();
        while let State::Row = stmt.next()? {
            kinds.push(stmt.read::<String, _>("kind")?.parse()?);
        }
        Ok(kinds)
    }

    fn mark_signals_consumed(&self, reminder_id: Uuid, kind: Option<SignalKind>) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = match kind {
            Some(_) => conn.prepare(
                "UPDATE reminder_signals SET consumed_at = ?
                 WHERE reminder_id = ? AND consumed_at IS NULL AND kind = ?",
            )?,
            None => conn.prepare(
                "UPDATE reminder_signals SET consumed_at = ?
                 WHERE reminder_id = ? AND consumed_at IS NULL",
            )?,
        };
        stmt.bind((1, format_time(Utc::now()).as_str()))?;
        stmt.bind((2, reminder_id.to_string().as_str()))?;
        if let Some(kind) = kind {
            stmt.bind((3, kind.to_string().as_str()))?;
        }
        while let State::Row = stmt.next()? {}
        Ok(conn.change_count())
    }
}

#[async_trait]
impl ReminderRepository for Database {
    async fn create(&self, new: NewReminder) -> Result<Reminder> {
        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title,
            description: new.description.filter(|d| !d.is_empty()),
            due_at: new.due_at,
            notification_target: new.notification_target,
            requires_ack: new.requires_ack,
            repeat_interval_minutes: new.repeat_interval_minutes,
            status: ReminderStatus::Pending,
            execution_handle: None,
            created_at: now,
            updated_at: now,
        };
        self.insert_reminder(&reminder)?;
        debug!("Inserted reminder {} for owner {}", reminder.id, reminder.owner_id);
        Ok(reminder)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>> {
        let id = id.to_string();
        Ok(self
            .select_reminders("WHERE id = ?", Some(&id))?
            .into_iter()
            .next())
    }

    async fn update_status(&self, id: Uuid, status: ReminderStatus) -> Result<()> {
        let changed = self.set_status(id, status)?;
        if changed == 0 {
            debug!("Reminder {id} status already {status} or terminal, nothing to update");
        }
        Ok(())
    }

    async fn update_execution_handle(&self, id: Uuid, handle: &ExecutionHandle) -> Result<bool> {
        Ok(self.set_execution_handle(id, handle)? > 0)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Reminder>> {
        self.select_reminders("WHERE owner_id = ? ORDER BY due_at ASC", Some(owner_id))
    }

    async fn list_by_owner_paged(
        &self,
        owner_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ReminderPage> {
        let total = self.count_by_owner(owner_id)?;
        let offset = page.saturating_sub(1) * page_size;
        let items = self.select_owner_page(owner_id, page_size, offset)?;
        Ok(ReminderPage::new(items, page, page_size, total))
    }

    async fn list_unscheduled(&self) -> Result<Vec<Reminder>> {
        self.select_reminders(
            "WHERE status = 'pending' AND (execution_handle IS NULL OR execution_handle = '')
             ORDER BY due_at ASC",
            None,
        )
    }
}

#[async_trait]
impl ExecutionStore for Database {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.upsert_checkpoint(checkpoint)
    }

    async fn load_checkpoint(&self, reminder_id: Uuid) -> Result<Option<Checkpoint>> {
        let id = reminder_id.to_string();
        Ok(self
            .select_checkpoints("WHERE reminder_id = ?", Some(&id))?
            .into_iter()
            .next())
    }

    async fn active_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.select_checkpoints("WHERE stage != 'finished' ORDER BY updated_at ASC", None)
    }

    async fn finished_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.select_checkpoints("WHERE stage = 'finished' ORDER BY updated_at ASC", None)
    }

    async fn enqueue_signal(&self, reminder_id: Uuid, kind: SignalKind) -> Result<()> {
        self.insert_signal(reminder_id, kind)
    }

    async fn pending_signals(&self, reminder_id: Uuid) -> Result<Vec<SignalKind>> {
        self.select_pending_signals(reminder_id)
    }

    async fn consume_signals(&self, reminder_id: Uuid, kind: Option<SignalKind>) -> Result<usize> {
        self.mark_signals_consumed(reminder_id, kind)
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn read_reminder(stmt: &Statement) -> Result<Reminder> {
    let handle = stmt
        .read::<Option<String>, _>("execution_handle")?
        .filter(|h| !h.is_empty())
        .map(|h| h.parse::<ExecutionHandle>())
        .transpose()?;

    Ok(Reminder {
        id: Uuid::parse_str(&stmt.read::<String, _>("id")?)?,
        owner_id: stmt.read::<String, _>("owner_id")?,
        title: stmt.read::<String, _>("title")?,
        description: stmt.read::<Option<String>, _>("description")?,
        due_at: parse_time(&stmt.read::<String, _>("due_at")?)?,
        notification_target: stmt.read::<String, _>("notification_target")?,
        requires_ack: stmt.read::<i64, _>("requires_ack")? != 0,
        repeat_interval_minutes: stmt.read::<i64, _>("repeat_interval_minutes")?.max(0) as u32,
        status: stmt.read::<String, _>("status")?.parse()?,
        execution_handle: handle,
        created_at: parse_time(&stmt.read::<String, _>("created_at")?)?,
        updated_at: parse_time(&stmt.read::<String, _>("updated_at")?)?,
    })
}
