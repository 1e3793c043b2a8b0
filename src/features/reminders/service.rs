//! # Reminder Service
//!
//! Create, cancel, acknowledge and list reminders on behalf of an owner. Cancel and
//! acknowledge only deliver signals; the reminder's process decides the resulting status.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Paged listing; cancel and acknowledge reach processes whose handle was not stored
//! - 1.1.0: Owner checks on every operation
//! - 1.0.0: Initial release

use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use super::model::{
    ExecutionHandle, NewReminder, Reminder, ReminderPage, ReminderStatus, SignalKind,
};
use super::repository::ReminderRepository;
use super::supervisor::ReminderSupervisor;
use crate::core::error::{ServiceError, ServiceResult};

const MAX_TITLE_LEN: usize = 255;
const MAX_REPEAT_INTERVAL_MINUTES: u32 = 24 * 60;
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

pub struct ReminderService {
    repository: Arc<dyn ReminderRepository>,
    supervisor: Arc<ReminderSupervisor>,
}

impl ReminderService {
    pub fn new(repository: Arc<dyn ReminderRepository>, supervisor: Arc<ReminderSupervisor>) -> Self {
        Self {
            repository,
            supervisor,
        }
    }

    /// Persist a reminder and start its process.
    ///
    /// The reminder is returned even when the process could not be started; it then stays
    /// pending without a handle until the supervisor adopts it.
    pub async fn create_reminder(&self, new: NewReminder) -> ServiceResult<Reminder> {
        validate(&new)?;

        let mut reminder = self.repository.create(new).await?;
        info!(
            "Created reminder {} for {} due at {}",
            reminder.id, reminder.owner_id, reminder.due_at
        );

        match self.supervisor.start(reminder.id, reminder.payload()).await {
            Ok(handle) => {
                if let Err(e) = self
                    .repository
                    .update_execution_handle(reminder.id, &handle)
                    .await
                {
                    warn!("Could not store handle of reminder {}: {e}", reminder.id);
                }
                reminder.execution_handle = Some(handle);
            }
            Err(e) => error!("Could not start process for reminder {}: {e}", reminder.id),
        }

        Ok(reminder)
    }

    pub async fn cancel_reminder(&self, owner_id: &str, reminder_id: Uuid) -> ServiceResult<()> {
        let reminder = self.owned(owner_id, reminder_id).await?;
        if reminder.status.is_terminal() {
            info!("Reminder {reminder_id} already {}, nothing to cancel", reminder.status);
            return Ok(());
        }

        // a process can be running even though storing its handle failed
        let handle = reminder
            .execution_handle
            .unwrap_or_else(|| ExecutionHandle::for_reminder(reminder_id));
        if !self.supervisor.signal(&handle, SignalKind::Cancel).await?
            && !self.supervisor.has_process(reminder_id).await?
        {
            // never started, so no process will ever write the status
            self.repository
                .update_status(reminder_id, ReminderStatus::Cancelled)
                .await?;
            // adoption may have started it meanwhile
            if self.supervisor.has_process(reminder_id).await? {
                self.supervisor.signal(&handle, SignalKind::Cancel).await?;
            }
        }

        info!("Cancel requested for reminder {reminder_id} by {owner_id}");
        Ok(())
    }

    pub async fn acknowledge_reminder(
        &self,
        owner_id: &str,
        reminder_id: Uuid,
    ) -> ServiceResult<()> {
        let reminder = self.owned(owner_id, reminder_id).await?;
        if reminder.status.is_terminal() {
            return Ok(());
        }

        let handle = reminder
            .execution_handle
            .unwrap_or_else(|| ExecutionHandle::for_reminder(reminder_id));
        if !self.supervisor.signal(&handle, SignalKind::Acknowledge).await?
            && !self.supervisor.has_process(reminder_id).await?
        {
            return Err(ServiceError::Validation(format!(
                "reminder {reminder_id} has not been scheduled yet"
            )));
        }

        info!("Reminder {reminder_id} acknowledged by {owner_id}");
        Ok(())
    }

    /// All reminders of an owner, soonest first
    pub async fn list_reminders(&self, owner_id: &str) -> ServiceResult<Vec<Reminder>> {
        Ok(self.repository.list_by_owner(owner_id).await?)
    }

    /// One page of an owner's reminders, soonest first. Pages start at 1; a page size
    /// outside `1..=100` falls back to 20.
    pub async fn list_reminders_paged(
        &self,
        owner_id: &str,
        page: usize,
        page_size: usize,
    ) -> ServiceResult<ReminderPage> {
        let page = page.max(1);
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };

        Ok(self
            .repository
            .list_by_owner_paged(owner_id, page, page_size)
            .await?)
    }

    pub async fn get_reminder(&self, owner_id: &str, reminder_id: Uuid) -> ServiceResult<Reminder> {
        self.owned(owner_id, reminder_id).await
    }

    async fn owned(&self, owner_id: &str, reminder_id: Uuid) -> ServiceResult<Reminder> {
        let reminder = self
            .repository
            .get(reminder_id)
            .await?
            .ok_or(ServiceError::NotFound(reminder_id))?;

        if reminder.owner_id != owner_id {
            return Err(ServiceError::Forbidden(reminder_id));
        }
        Ok(reminder)
    }
}

fn validate(new: &NewReminder) -> ServiceResult<()> {
    if new.owner_id.trim().is_empty() {
        return Err(ServiceError::Validation("owner is required".to_string()));
    }
    if new.title.trim().is_empty() {
        return Err(ServiceError::Validation("title is required".to_string()));
    }
    if new.title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::Validation(format!(
            "title is longer than {MAX_TITLE_LEN} characters"
        )));
    }
    if new.repeat_interval_minutes > MAX_REPEAT_INTERVAL_MINUTES {
        return Err(ServiceError::Validation(format!(
            "repeat interval must be at most {MAX_REPEAT_INTERVAL_MINUTES} minutes"
        )));
    }
    Ok(())
}
