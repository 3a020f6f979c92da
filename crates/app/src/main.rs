use std::time::Duration;

use clap::Parser;
use engine::{CancelToken, Engine, SqlStore};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod commands;
mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = commands::Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(format!(
            "simplebank={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let url = match cli.database_url {
        Some(url) => url,
        None => database_url(&settings.database),
    };
    let db = connect_db(&url).await?;
    let engine = Engine::builder()
        .store(SqlStore::new(db))
        .allow_overdraft(settings.ledger.allow_overdraft)
        .build()
        .await?;

    let cancel = match settings.ledger.timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::new(),
    };
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling...");
            interrupt.cancel();
        }
    });

    match commands::run(&engine, &cancel, cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            tracing::error!("command failed: {err}");
            Err(err)
        }
    }
}

fn database_url(config: &Database) -> String {
    match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    }
}

async fn connect_db(
    url: &str,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    tracing::debug!("connecting to {url}");
    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
