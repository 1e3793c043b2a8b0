//! Repository seam for persisted reminder rows.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{ExecutionHandle, NewReminder, Reminder, ReminderPage, ReminderStatus};

/// CRUD on reminder rows. Implementations must be safe to share between many processes.
#[async_trait]
pub trait ReminderRepository: Send + Sync {
    /// Insert a new row with status `Pending`
    async fn create(&self, reminder: NewReminder) -> Result<Reminder>;

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>>;

    async fn update_status(&self, id: Uuid, status: ReminderStatus) -> Result<()>;

    /// Store the handle unless one is already set. Returns whether the row changed.
    async fn update_execution_handle(&self, id: Uuid, handle: &ExecutionHandle) -> Result<bool>;

    /// Reminders of one owner ordered by due time
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Reminder>>;

    /// One page (1-based) of an owner's reminders in the same order as `list_by_owner`
    async fn list_by_owner_paged(
        &self,
        owner_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ReminderPage>;

    /// Pending reminders whose process never started
    async fn list_unscheduled(&self) -> Result<Vec<Reminder>>;
}

/// Source of wall-clock time for the scheduling process
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
