//! # Notification Dispatcher
//!
//! One logical delivery of a reminder: renders the text and sends it through a
//! [`NotificationChannel`] with bounded retries, exponential backoff with jitter and a
//! per-attempt timeout.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Attempt ledger so a resumed delivery only uses the remaining budget
//! - 1.0.0: Initial release

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use super::channel::NotificationChannel;
use crate::core::config::SchedulerSettings;
use crate::features::reminders::model::ReminderPayload;

/// Why a delivery did not happen
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("notification target {0:?} is not valid for this channel")]
    InvalidTarget(String),

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("could not record dispatch attempt: {0}")]
    Ledger(anyhow::Error),
}

/// Retry policy for a single delivery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            attempt_timeout: settings.attempt_timeout(),
            backoff_initial: settings.backoff_initial(),
            backoff_max: settings.backoff_max(),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): the exponential step,
    /// capped, with the upper half jittered
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let step = self
            .backoff_initial
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max);

        let half = step / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return step;
        }
        half + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Records each attempt before it is made, so a re-executed delivery cannot exceed the budget
#[async_trait]
pub trait AttemptLedger: Send + Sync {
    async fn record_attempt(&self, attempt: u32) -> Result<()>;
}

/// Ledger for deliveries that do not need to survive a restart
pub struct NoLedger;

#[async_trait]
impl AttemptLedger for NoLedger {
    async fn record_attempt(&self, _attempt: u32) -> Result<()> {
        Ok(())
    }
}

/// What gets delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub reminder_id: Uuid,
    pub target: String,
    pub title: String,
    pub description: Option<String>,
    pub requires_ack: bool,
}

impl Notification {
    pub fn from_payload(reminder_id: Uuid, payload: &ReminderPayload) -> Self {
        Self {
            reminder_id,
            target: payload.notification_target.clone(),
            title: payload.title.clone(),
            description: payload.description.clone(),
            requires_ack: payload.requires_ack,
        }
    }

    /// Message text sent to the channel
    pub fn render(&self) -> String {
        let mut text = format!("🔔 {}", self.title);
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(&format!("\n\n{description}"));
        }
        if self.requires_ack {
            text.push_str(&format!(
                "\n\nPlease acknowledge this reminder to stop the repeats (ID {})",
                self.reminder_id
            ));
        }
        text
    }
}

/// Sends notifications with the retry policy applied
#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Check the target before any attempt is spent on it
    pub fn check_target(&self, target: &str) -> Result<(), DispatchError> {
        if self.channel.validate_target(target) {
            Ok(())
        } else {
            Err(DispatchError::InvalidTarget(target.to_string()))
        }
    }

    /// Deliver with the full attempt budget. Returns the attempt number that succeeded.
    pub async fn dispatch(&self, notification: &Notification) -> Result<u32, DispatchError> {
        self.dispatch_resumed(notification, 0, &NoLedger).await
    }

    /// Deliver after `attempts_made` attempts were already spent on this occasion
    pub async fn dispatch_resumed(
        &self,
        notification: &Notification,
        attempts_made: u32,
        ledger: &dyn AttemptLedger,
    ) -> Result<u32, DispatchError> {
        self.check_target(&notification.target)?;

        let max_attempts = self.policy.max_attempts;
        if attempts_made >= max_attempts {
            return Err(DispatchError::Exhausted {
                attempts: attempts_made,
                last_error: "attempt budget already spent before restart".to_string(),
            });
        }

        let text = notification.render();
        let mut last_error = String::new();

        for attempt in attempts_made + 1..=max_attempts {
            ledger
                .record_attempt(attempt)
                .await
                .map_err(DispatchError::Ledger)?;

            debug!(
                "Dispatching reminder {} via {} (attempt {attempt}/{max_attempts})",
                notification.reminder_id,
                self.channel.name()
            );

            match timeout(
                self.policy.attempt_timeout,
                self.channel.send(&notification.target, &text),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(
                        "Reminder {} delivered on attempt {attempt}",
                        notification.reminder_id
                    );
                    return Ok(attempt);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "timed out after {}s",
                        self.policy.attempt_timeout.as_secs()
                    )
                }
            }

            warn!(
                "Reminder {} delivery attempt {attempt}/{max_attempts} failed: {last_error}",
                notification.reminder_id
            );

            if attempt < max_attempts {
                sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(DispatchError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
