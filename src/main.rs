use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use notify_service::{
    api::run_api_server,
    broker::Broker,
    clients::{database::DatabaseClient, health::HealthChecker, rbmq::RabbitMqClient},
    config::Config,
    consumer::{Consumer, ConsumerMode, StdoutHandler},
    directory::{Directory, StaticDirectory},
    models::{category::Category, role::Role},
    topology::TopologyManager,
    utils::init_tracing,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "notification_consumer")]
#[command(about = "Listen for notifications addressed to one client, provider or admin", long_about = None)]
struct Cli {
    /// client, provider or admin
    role: Role,

    target_id: String,

    /// Listen on this category's broadcast exchange instead of the direct queue.
    /// Repeat to bind several categories to one private queue.
    #[arg(short, long = "category", value_name = "CATEGORY")]
    categories: Vec<String>,

    /// Bind to every category the directory lists for this provider.
    #[arg(long, conflicts_with = "categories")]
    from_directory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let config = Config::load().context("Failed to load configuration")?;

    let broker: Arc<dyn Broker> = Arc::new(RabbitMqClient::from_config(&config));
    let topology = TopologyManager::new(broker.clone());

    let database = match &config.database_url {
        Some(url) => Some(Arc::new(DatabaseClient::connect(url).await?)),
        None => None,
    };
    let directory: Arc<dyn Directory> = match &database {
        Some(database) => database.clone() as Arc<dyn Directory>,
        None => Arc::new(StaticDirectory::new(config.categories())),
    };

    let mode = resolve_mode(&cli, directory.as_ref()).await?;

    if let Some(port) = config.server_port {
        let mut checker = HealthChecker::new(broker.clone(), directory.clone());
        if let Some(database) = &database {
            checker = checker.with_database(database.clone());
        }
        tokio::spawn(async move {
            if let Err(e) = run_api_server(port, checker).await {
                error!(error = %e, "Health check server stopped");
            }
        });
    }

    let consumer = Consumer::new(
        topology,
        mode,
        Arc::new(StdoutHandler::new(cli.role)),
        config.redelivery_policy(),
        config.retry_config(),
    );

    consumer
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("Consumer stopped");
    Ok(())
}

async fn resolve_mode(cli: &Cli, directory: &dyn Directory) -> Result<ConsumerMode> {
    let categories: Vec<Category> = if cli.from_directory {
        if cli.role != Role::Provider {
            bail!("--from-directory only applies to providers");
        }
        let categories = directory.categories_for_provider(&cli.target_id).await?;
        if categories.is_empty() {
            bail!("provider {} has no categories in the directory", cli.target_id);
        }
        categories
    } else {
        cli.categories
            .iter()
            .map(Category::new)
            .filter(|c| !c.is_empty())
            .collect()
    };

    if categories.is_empty() {
        return Ok(ConsumerMode::Direct {
            role: cli.role,
            target_id: cli.target_id.clone(),
        });
    }

    Ok(ConsumerMode::Broadcast {
        role: cli.role,
        target_id: cli.target_id.clone(),
        categories,
    })
}
