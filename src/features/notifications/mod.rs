//! # Feature: Notifications
//!
//! Delivery of reminder text to external channels with bounded retries.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Attempt ledger for restart-safe retry budgets
//! - 1.0.0: Initial release with Telegram and log channels

pub mod channel;
pub mod dispatcher;
pub mod telegram;

pub use channel::{LogChannel, NotificationChannel};
pub use dispatcher::{
    AttemptLedger, DispatchError, NoLedger, Notification, NotificationDispatcher, RetryPolicy,
};
pub use telegram::TelegramChannel;
