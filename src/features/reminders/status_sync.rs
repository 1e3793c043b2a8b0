//! # Status Synchronizer
//!
//! Mirrors process transitions into the reminder row. Re-applying the status a reminder
//! already has is a no-op. Persistence failures are logged and never stop the process:
//! while it runs, the process checkpoint is authoritative, not the row.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use anyhow::Result;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

use super::model::ReminderStatus;
use super::repository::ReminderRepository;

pub struct StatusSynchronizer {
    repository: Arc<dyn ReminderRepository>,
    /// Last status successfully written per reminder
    applied: DashMap<Uuid, ReminderStatus>,
}

impl StatusSynchronizer {
    pub fn new(repository: Arc<dyn ReminderRepository>) -> Self {
        Self {
            repository,
            applied: DashMap::new(),
        }
    }

    /// Write `status` unless it was already written
    pub async fn update_status(&self, reminder_id: Uuid, status: ReminderStatus) -> Result<()> {
        if self.applied.get(&reminder_id).map(|s| *s) == Some(status) {
            debug!("Reminder {reminder_id} already {status}, skipping write");
            return Ok(());
        }

        self.repository.update_status(reminder_id, status).await?;
        self.applied.insert(reminder_id, status);
        debug!("Reminder {reminder_id} status persisted as {status}");
        Ok(())
    }

    /// Like [`update_status`](Self::update_status) but only logs failures
    pub async fn record(&self, reminder_id: Uuid, status: ReminderStatus) {
        if let Err(e) = self.update_status(reminder_id, status).await {
            warn!("Failed to persist status {status} for reminder {reminder_id}: {e}");
        }
    }

    /// Drop the cached status once a process is gone
    pub fn forget(&self, reminder_id: Uuid) {
        self.applied.remove(&reminder_id);
    }
}
