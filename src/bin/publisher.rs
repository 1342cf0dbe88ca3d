use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use notify_service::{
    broker::Broker,
    clients::{database::DatabaseClient, rbmq::RabbitMqClient},
    config::Config,
    directory::{Directory, StaticDirectory},
    dispatch::DispatchPolicy,
    models::{category::Category, role::Role},
    publisher::Publisher,
    topology::TopologyManager,
    utils::init_tracing,
};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "notification_publisher")]
#[command(about = "Send notifications by hand", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send to one client, provider or admin's direct queue
    Direct {
        role: Role,
        target_id: String,
        #[arg(default_value = "Test notification")]
        message: String,
    },
    /// Broadcast to a category exchange. OTHER reaches every known category
    Broadcast {
        category: String,
        #[arg(long, default_value = "test-provider")]
        provider_id: String,
        #[arg(default_value = "Test notification")]
        message: String,
    },
    /// Re-run new-service dispatch for a persisted service
    Replay { service_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let config = Config::load().context("Failed to load configuration")?;

    let broker: Arc<dyn Broker> = Arc::new(RabbitMqClient::from_config(&config));
    let publisher = Publisher::new(TopologyManager::new(broker.clone()), config.retry_config());

    let outcome = run(cli.command, &config, publisher).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close broker connection cleanly");
    }

    outcome
}

async fn run(command: Commands, config: &Config, publisher: Publisher) -> Result<()> {
    match command {
        Commands::Direct {
            role,
            target_id,
            message,
        } => {
            let message_id = publisher
                .notify_direct(role, &target_id, json!({ "message": message }))
                .await?;
            info!(%message_id, %role, target_id, "Direct notification sent");
        }
        Commands::Broadcast {
            category,
            provider_id,
            message,
        } => {
            let category = Category::new(&category);
            if category.is_empty() {
                return Err(anyhow!("category must not be empty"));
            }

            let targets = if category.is_wildcard() {
                directory(config).await?.list_known_categories().await?
            } else {
                vec![category]
            };

            for target in &targets {
                let message_id = publisher
                    .send_category_notification(target, &provider_id, json!({ "message": message }))
                    .await?;
                info!(
                    %message_id,
                    exchange = %target.exchange_name(),
                    provider_id,
                    "Category notification sent"
                );
            }
        }
        Commands::Replay { service_id } => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL is required to replay a service"))?;
            let database = Arc::new(DatabaseClient::connect(url).await?);

            let report = DispatchPolicy::new(database.clone(), publisher)
                .with_records(database)
                .replay_service(&service_id)
                .await?;

            info!(
                service_id = report.service_id,
                exchanges = ?report.exchanges,
                matched_providers = ?report.matched_providers,
                "Replay complete"
            );
        }
    }

    Ok(())
}

async fn directory(config: &Config) -> Result<Arc<dyn Directory>> {
    Ok(match &config.database_url {
        Some(url) => Arc::new(DatabaseClient::connect(url).await?),
        None => Arc::new(StaticDirectory::new(config.categories())),
    })
}
