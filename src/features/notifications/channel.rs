//! Notification channel seam and the logging fallback channel.

use anyhow::Result;
use async_trait::async_trait;
use log::info;

/// Delivers rendered reminder text to a destination. One call is one external send.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs
    fn name(&self) -> &'static str;

    /// Whether `target` is a destination this channel can deliver to
    fn validate_target(&self, target: &str) -> bool {
        !target.trim().is_empty()
    }

    async fn send(&self, target: &str, text: &str) -> Result<()>;
}

/// Writes notifications to the log. Used when no real channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, target: &str, text: &str) -> Result<()> {
        info!("[notify {target}] {}", text.replace('\n', " | "));
        Ok(())
    }
}
