//! # Process Checkpoints
//!
//! The durable state of a scheduling process. A checkpoint is written after every transition
//! and before the next wait, so a restarted daemon can resume each reminder where it stopped.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Dispatch attempts recorded in the checkpoint (attempt ledger)
//! - 1.0.0: Initial release

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{ReminderPayload, ReminderStatus, SignalKind};

/// Where a process is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Sleeping until the due time
    Waiting { due_at: DateTime<Utc> },

    /// Delivering notification number `occasion`; `attempts` sends already started
    Dispatching {
        occasion: u32,
        attempts: u32,
        /// Start of the confirming loop for repeat deliveries
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confirming_since: Option<DateTime<Utc>>,
    },

    /// Delivered at least once, waiting for an acknowledgment until `next_at`
    Confirming {
        since: DateTime<Utc>,
        next_at: DateTime<Utc>,
        occasions: u32,
    },

    /// Terminal
    Finished { status: ReminderStatus },
}

impl Stage {
    pub fn is_finished(&self) -> bool {
        matches!(self, Stage::Finished { .. })
    }

    /// Short label for logs
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Waiting { .. } => "waiting",
            Stage::Dispatching { .. } => "dispatching",
            Stage::Confirming { .. } => "confirming",
            Stage::Finished { .. } => "finished",
        }
    }
}

/// Snapshot of one reminder's process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub reminder_id: Uuid,
    pub payload: ReminderPayload,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// First checkpoint of a freshly started process
    pub fn initial(reminder_id: Uuid, payload: ReminderPayload, now: DateTime<Utc>) -> Self {
        let due_at = payload.due_at;
        Self {
            reminder_id,
            payload,
            stage: Stage::Waiting { due_at },
            updated_at: now,
        }
    }

    /// Same process, next stage
    pub fn advance(&self, stage: Stage, now: DateTime<Utc>) -> Self {
        Self {
            reminder_id: self.reminder_id,
            payload: self.payload.clone(),
            stage,
            updated_at: now,
        }
    }
}

/// Durable storage backing the scheduling substrate: checkpoints and the signal queue
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace the checkpoint of a reminder
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load_checkpoint(&self, reminder_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Every checkpoint that is not finished (for crash recovery)
    async fn active_checkpoints(&self) -> Result<Vec<Checkpoint>>;

    /// Every finished checkpoint, used to reconcile rows whose terminal write was lost
    async fn finished_checkpoints(&self) -> Result<Vec<Checkpoint>>;

    /// Append a signal to the reminder's queue
    async fn enqueue_signal(&self, reminder_id: Uuid, kind: SignalKind) -> Result<()>;

    /// Distinct kinds of the signals not yet consumed
    async fn pending_signals(&self, reminder_id: Uuid) -> Result<Vec<SignalKind>>;

    /// Mark queued signals consumed, all kinds when `kind` is `None`. Returns the row count.
    async fn consume_signals(&self, reminder_id: Uuid, kind: Option<SignalKind>) -> Result<usize>;
}
