// Core layer - shared types and configuration
pub mod core;

// Features layer - reminders and their delivery channels
pub mod features;

// Infrastructure
pub mod database;

pub use core::Config;
pub use features::{
    LogChannel, NotificationChannel, NotificationDispatcher, ReminderService, ReminderSupervisor,
    TelegramChannel,
};
