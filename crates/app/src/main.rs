use std::sync::Arc;
use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "abitudine={level},reminder={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let mut tasks = tokio::task::JoinSet::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    match (settings.telegram, settings.reminders) {
        (Some(telegram), Some(reminders)) => {
            tracing::info!("Found reminder settings...");
            let db = parse_database(&settings.database).await?;
            let engine = engine::Engine::builder().database(db).build().await?;

            let scheduler = reminder::Scheduler::builder()
                .store(engine)
                .channel(Arc::new(reminder::TelegramChannel::new(&telegram.token)))
                .timezone(&reminders.timezone)
                .cadence(Duration::from_secs(reminders.cadence_seconds))
                .pool_size(reminders.pool_size)
                .retry_policy(reminder::RetryPolicy {
                    max_retries: reminders.max_retries,
                    backoff: Duration::from_secs(reminders.backoff_seconds),
                })
                .build()?;

            tasks.spawn(async move { scheduler.run(shutdown_rx).await });
        }
        (None, Some(_)) => {
            return Err("reminders configured without telegram credentials".into());
        }
        _ => {
            tracing::warn!("no reminder settings found, nothing to run");
            return Ok(());
        }
    }

    tasks.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
