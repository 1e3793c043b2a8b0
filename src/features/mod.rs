//! # Features Module
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

pub mod notifications;
pub mod reminders;

pub use notifications::{LogChannel, NotificationChannel, NotificationDispatcher, TelegramChannel};
pub use reminders::{ReminderService, ReminderSupervisor};
