use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

use nudge::core::{Config, SchedulerSettings};
use nudge::database::Database;
use nudge::features::notifications::{
    LogChannel, NotificationChannel, NotificationDispatcher, RetryPolicy, TelegramChannel,
};
use nudge::features::reminders::ReminderSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting nudge reminder daemon...");

    let settings = match SchedulerSettings::load(&config.scheduler_config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!(
                "❌ Failed to load scheduler settings from {}: {e}",
                config.scheduler_config_path
            );
            return Err(e);
        }
    };

    let database = Arc::new(Database::new(&config.database_path).await?);
    info!("📄 Database opened at {}", config.database_path);

    let channel: Arc<dyn NotificationChannel> = match &config.telegram_bot_token {
        Some(token) => {
            info!("📡 Delivering reminders through Telegram");
            Arc::new(TelegramChannel::new(&config.telegram_api_url, token)?)
        }
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set - reminders will only be logged");
            Arc::new(LogChannel)
        }
    };

    let dispatcher = NotificationDispatcher::new(channel, RetryPolicy::from_settings(&settings));
    let supervisor = Arc::new(ReminderSupervisor::new(
        database.clone(),
        database,
        dispatcher,
        &settings,
    ));

    match supervisor.recover().await {
        Ok(count) => info!("Recovered {count} reminder processes"),
        Err(e) => error!("Recovery failed, continuing with new reminders only: {e}"),
    }

    let adoption = supervisor.clone();
    let adopt_interval = settings.adopt_interval();
    tokio::spawn(async move {
        adoption.run_adoption(adopt_interval).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, {} processes will resume on next start", supervisor.active_count());
    supervisor.shutdown();

    Ok(())
}
