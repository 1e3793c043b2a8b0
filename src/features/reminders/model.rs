//! # Reminder Model
//!
//! Persisted reminder rows, lifecycle statuses, inbound signals and execution handles.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Split `ReminderPayload` out of `Reminder` for checkpoints
//! - 1.0.0: Initial release

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Row created, no process has picked it up yet
    Pending,
    /// A scheduling process owns the reminder
    Processing,
    /// Delivered (and acknowledged, when required)
    Sent,
    /// Cancelled before completion
    Cancelled,
    /// Invalid target, exhausted retries or substrate failure
    Failed,
}

impl ReminderStatus {
    /// Terminal statuses are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReminderStatus::Sent | ReminderStatus::Cancelled | ReminderStatus::Failed
        )
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Processing => write!(f, "processing"),
            ReminderStatus::Sent => write!(f, "sent"),
            ReminderStatus::Cancelled => write!(f, "cancelled"),
            ReminderStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReminderStatus::Pending),
            "processing" => Ok(ReminderStatus::Processing),
            "sent" => Ok(ReminderStatus::Sent),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            "failed" => Ok(ReminderStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid reminder status: {}", s)),
        }
    }
}

/// Inbound event addressed to one reminder's process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Cancel,
    Acknowledge,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Cancel => write!(f, "cancel"),
            SignalKind::Acknowledge => write!(f, "acknowledge"),
        }
    }
}

impl std::str::FromStr for SignalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cancel" => Ok(SignalKind::Cancel),
            "acknowledge" | "ack" => Ok(SignalKind::Acknowledge),
            _ => Err(anyhow::anyhow!("Invalid signal kind: {}", s)),
        }
    }
}

/// Identifier of the process running a reminder, `reminder/<uuid>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

const HANDLE_PREFIX: &str = "reminder/";

impl ExecutionHandle {
    pub fn for_reminder(reminder_id: Uuid) -> Self {
        Self(format!("{HANDLE_PREFIX}{reminder_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the reminder ID the handle was issued for
    pub fn reminder_id(&self) -> Result<Uuid> {
        let raw = self
            .0
            .strip_prefix(HANDLE_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("Malformed execution handle: {}", self.0))?;
        Ok(Uuid::parse_str(raw)?)
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ExecutionHandle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let handle = Self(s.to_string());
        handle.reminder_id()?;
        Ok(handle)
    }
}

/// Input for creating a reminder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub notification_target: String,
    pub requires_ack: bool,
    /// Minutes between repeated deliveries while unacknowledged
    pub repeat_interval_minutes: u32,
}

/// A persisted reminder row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    /// Unique reminder identifier
    pub id: Uuid,

    /// User who owns the reminder
    pub owner_id: String,

    pub title: String,

    pub description: Option<String>,

    /// When the notification is due (never changes after creation)
    pub due_at: DateTime<Utc>,

    /// Channel-specific destination (e.g. a Telegram chat ID)
    pub notification_target: String,

    /// Whether delivery repeats until the recipient acknowledges
    pub requires_ack: bool,

    /// Minutes between repeated deliveries; only meaningful with `requires_ack`
    pub repeat_interval_minutes: u32,

    pub status: ReminderStatus,

    /// Set once when the scheduling process starts
    pub execution_handle: Option<ExecutionHandle>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// The immutable part of the reminder that travels with its process
    pub fn payload(&self) -> ReminderPayload {
        ReminderPayload {
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            due_at: self.due_at,
            notification_target: self.notification_target.clone(),
            requires_ack: self.requires_ack,
            repeat_interval_minutes: self.repeat_interval_minutes,
        }
    }
}

/// One page of an owner's reminders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPage {
    pub items: Vec<Reminder>,

    /// 1-based page number of `items`
    pub page: usize,

    /// At least 1, even when the owner has no reminders
    pub total_pages: usize,

    pub total_items: usize,
}

impl ReminderPage {
    pub fn new(items: Vec<Reminder>, page: usize, page_size: usize, total_items: usize) -> Self {
        Self {
            items,
            page,
            total_pages: total_items.div_ceil(page_size.max(1)).max(1),
            total_items,
        }
    }
}

/// Process input: everything the state machine needs without touching the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub notification_target: String,
    pub requires_ack: bool,
    pub repeat_interval_minutes: u32,
}

impl ReminderPayload {
    /// Interval of the confirming loop, `None` when the reminder is fire-once
    pub fn repeat_interval(&self) -> Option<chrono::Duration> {
        if self.requires_ack && self.repeat_interval_minutes > 0 {
            Some(chrono::Duration::minutes(self.repeat_interval_minutes as i64))
        } else {
            None
        }
    }
}
