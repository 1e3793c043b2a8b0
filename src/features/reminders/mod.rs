//! # Feature: Reminders
//!
//! Durable reminder scheduling. Each reminder is owned by a checkpointed process that waits
//! for the due time, delivers the notification and, when acknowledgment is required, keeps
//! re-delivering until the owner confirms or a ceiling is reached.
//!
//! - **Version**: 1.3.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.3.0: Paged listing, reconciliation of finished checkpoints on recovery
//! - 1.2.0: Adoption of unscheduled reminders, configurable ceiling outcome
//! - 1.1.0: Repeat-until-acknowledged delivery
//! - 1.0.0: Initial release with crash recovery from checkpoints

pub mod checkpoint;
pub mod model;
pub mod process;
pub mod repository;
pub mod service;
pub mod signals;
pub mod status_sync;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{Checkpoint, ExecutionStore, Stage};
pub use model::{
    ExecutionHandle, NewReminder, Reminder, ReminderPage, ReminderPayload, ReminderStatus,
    SignalKind,
};
pub use process::{ProcessError, ReminderProcess};
pub use repository::{Clock, ReminderRepository, SystemClock};
pub use service::ReminderService;
pub use status_sync::StatusSynchronizer;
pub use supervisor::ReminderSupervisor;
