use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use vigil::cache::StatusCache;
use vigil::config::Config;
use vigil::database::{LibsqlStore, initialize_database};
use vigil::monitoring::{MonitoringExecutor, Scheduler};
use vigil::notifications::senders::EmailSender;
use vigil::notifications::{ChannelNotifier, NotificationDispatcher};
use vigil::pool;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref()).context("Failed to load configuration")?;
    if args.print_config {
        print!("{}", config);
        return Ok(());
    }

    logger::init_with(&config.logging);
    info!("Starting vigil-service {}", env!("CARGO_PKG_VERSION"));

    let pool = pool::open_local(&config.database.path, config.database.pool_size)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    {
        let conn = pool.get().await.context("Failed to get a database connection")?;
        initialize_database(&conn).await.context("Failed to run migrations")?;
    }
    let store = Arc::new(LibsqlStore::new_from_pool(pool));

    let email = match &config.notifications.smtp {
        Some(smtp) => Some(EmailSender::new(smtp, config.notifications.send_timeout())?),
        None => {
            warn!("No SMTP relay configured, email channels will fail");
            None
        }
    };
    let http = reqwest::Client::builder()
        .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let notifier = Arc::new(ChannelNotifier::new(http, email));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        notifier,
        config.notifications.max_concurrent_sends,
        config.notifications.send_timeout(),
    ));
    let cache = Arc::new(StatusCache::new(config.scheduler.status_ttl()));
    let scheduler = Scheduler::new(store, MonitoringExecutor::new()?, dispatcher, cache);

    if let Err(e) = scheduler.start().await {
        // Keep running: monitors upserted later are still scheduled
        error!("{}", e);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    scheduler.stop(config.scheduler.shutdown_grace()).await;
    Ok(())
}
