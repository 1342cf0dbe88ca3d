use std::{collections::BTreeMap, sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    broker::Broker,
    clients::database::DatabaseClient,
    directory::Directory,
    models::health::{Component, ComponentHealth, HealthCheckResponse},
};

/// Probes the broker and the provider directory on demand.
pub struct HealthChecker {
    broker: Arc<dyn Broker>,
    directory: Arc<dyn Directory>,
    database: Option<Arc<DatabaseClient>>,
}

impl HealthChecker {
    pub fn new(broker: Arc<dyn Broker>, directory: Arc<dyn Directory>) -> Self {
        Self {
            broker,
            directory,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Arc<DatabaseClient>) -> Self {
        self.database = Some(database);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        checks.insert(Component::MessageBroker, self.check_broker().await);
        checks.insert(Component::Directory, self.check_directory().await);

        if let Some(database) = &self.database {
            checks.insert(Component::Database, check_database(database).await);
        }

        HealthCheckResponse::from_checks(checks)
    }

    async fn check_broker(&self) -> ComponentHealth {
        let start = Instant::now();

        match self.broker.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Broker reachable");
                ComponentHealth::reachable(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ComponentHealth::unreachable(e)
            }
        }
    }

    /// An empty category list leaves wildcard dispatch with nowhere to go.
    async fn check_directory(&self) -> ComponentHealth {
        let start = Instant::now();

        match self.directory.list_known_categories().await {
            Ok(categories) if categories.is_empty() => {
                ComponentHealth::degraded("no known categories, wildcard dispatch reaches nobody")
            }
            Ok(categories) => ComponentHealth::reachable(start.elapsed().as_millis() as u64)
                .with_detail(format!("{} known categories", categories.len())),
            Err(e) => {
                warn!(error = %e, "Category lookup failed");
                ComponentHealth::unreachable(e)
            }
        }
    }
}

async fn check_database(database: &DatabaseClient) -> ComponentHealth {
    let start = Instant::now();

    match database.health_check().await {
        Ok(()) => ComponentHealth::reachable(start.elapsed().as_millis() as u64),
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            ComponentHealth::unreachable(e)
        }
    }
}
