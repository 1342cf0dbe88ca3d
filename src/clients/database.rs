use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::{
    directory::{Directory, ProviderMatch, ServiceRecords},
    error::{NotifyError, Result},
    models::{category::Category, provider::ProviderProfile, service::ServiceSnapshot},
};

const PROVIDERS_FOR_CATEGORY: &str = r#"
    SELECT p.id
    FROM "Provider" p
    LEFT JOIN "Field" f ON f.id = p."fieldId"
    WHERE UPPER(f.name::text) = $1
       OR $1 = ANY(p."serviceCategories"::text[])
"#;

const KNOWN_CATEGORIES: &str = r#"SELECT name::text FROM "Field" ORDER BY name"#;

const PROVIDER_CATEGORIES: &str = r#"
    SELECT f.name::text, COALESCE(p."serviceCategories"::text[], '{}')
    FROM "Provider" p
    LEFT JOIN "Field" f ON f.id = p."fieldId"
    WHERE p.id = $1
"#;

const SERVICE_BY_ID: &str = r#"SELECT row_to_json(s) FROM "Service" s WHERE s.id = $1"#;

/// Read-only access to the identity store. Never issues writes.
pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| NotifyError::Directory(format!("Failed to connect to database: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn health_check(&self) -> Result<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| NotifyError::Directory(format!("Database health check failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl Directory for DatabaseClient {
    async fn resolve_providers_for_category(&self, category: &Category) -> Result<ProviderMatch> {
        if category.is_wildcard() {
            return Ok(ProviderMatch::AllCategories);
        }

        let rows = self
            .client
            .query(PROVIDERS_FOR_CATEGORY, &[&category.as_str()])
            .await?;

        let ids = rows.iter().map(|row| row.get::<_, String>(0)).collect();

        debug!(category = %category, matched = rows.len(), "Resolved providers for category");

        Ok(ProviderMatch::Providers(ids))
    }

    async fn list_known_categories(&self) -> Result<Vec<Category>> {
        let rows = self.client.query(KNOWN_CATEGORIES, &[]).await?;

        let mut categories: Vec<Category> = Vec::with_capacity(rows.len());
        for row in &rows {
            let category = Category::new(row.get::<_, String>(0));
            if !category.is_empty() && !categories.contains(&category) {
                categories.push(category);
            }
        }

        Ok(categories)
    }

    async fn categories_for_provider(&self, provider_id: &str) -> Result<Vec<Category>> {
        let row = self
            .client
            .query_opt(PROVIDER_CATEGORIES, &[&provider_id])
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let profile = ProviderProfile {
            id: provider_id.to_string(),
            field: row.get::<_, Option<String>>(0).map(Category::new),
            service_categories: row
                .get::<_, Vec<String>>(1)
                .into_iter()
                .map(Category::new)
                .collect(),
        };

        Ok(profile.categories())
    }
}

#[async_trait]
impl ServiceRecords for DatabaseClient {
    async fn fetch_service(&self, service_id: &str) -> Result<Option<ServiceSnapshot>> {
        let row = self.client.query_opt(SERVICE_BY_ID, &[&service_id]).await?;

        match row {
            Some(row) => {
                let record: serde_json::Value = row.get(0);
                Ok(Some(serde_json::from_value(record)?))
            }
            None => Ok(None),
        }
    }
}
