//! Read-only lookups against the provider/category store.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{
    error::Result,
    models::{
        category::Category,
        provider::{ProviderId, ProviderProfile},
        service::ServiceSnapshot,
    },
};

/// Outcome of resolving a category to providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMatch {
    Providers(BTreeSet<ProviderId>),
    /// The wildcard category: fan out across every known category instead.
    AllCategories,
}

impl ProviderMatch {
    pub fn provider_count(&self) -> Option<usize> {
        match self {
            ProviderMatch::Providers(ids) => Some(ids.len()),
            ProviderMatch::AllCategories => None,
        }
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve_providers_for_category(&self, category: &Category) -> Result<ProviderMatch>;

    /// Known categories in a stable order. Drives wildcard fan-out.
    async fn list_known_categories(&self) -> Result<Vec<Category>>;

    /// Every category a provider should hear broadcasts for. Empty when unknown.
    async fn categories_for_provider(&self, provider_id: &str) -> Result<Vec<Category>>;
}

#[async_trait]
pub trait ServiceRecords: Send + Sync {
    async fn fetch_service(&self, service_id: &str) -> Result<Option<ServiceSnapshot>>;
}

/// Directory held in memory, for deployments without a database and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    categories: Vec<Category>,
    providers: Vec<ProviderProfile>,
}

impl StaticDirectory {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut unique: Vec<Category> = Vec::with_capacity(categories.len());
        for category in categories {
            if !unique.contains(&category) {
                unique.push(category);
            }
        }

        Self {
            categories: unique,
            providers: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Category::defaults())
    }

    pub fn with_provider(mut self, provider: ProviderProfile) -> Self {
        self.providers.retain(|p| p.id != provider.id);
        self.providers.push(provider);
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve_providers_for_category(&self, category: &Category) -> Result<ProviderMatch> {
        if category.is_wildcard() {
            return Ok(ProviderMatch::AllCategories);
        }

        let ids = self
            .providers
            .iter()
            .filter(|p| p.serves(category))
            .map(|p| p.id.clone())
            .collect();

        Ok(ProviderMatch::Providers(ids))
    }

    async fn list_known_categories(&self) -> Result<Vec<Category>> {
        Ok(self.categories.clone())
    }

    async fn categories_for_provider(&self, provider_id: &str) -> Result<Vec<Category>> {
        Ok(self
            .providers
            .iter()
            .find(|p| p.id == provider_id)
            .map(ProviderProfile::categories)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticDirectory {
        StaticDirectory::with_defaults()
            .with_provider(ProviderProfile::new("p-tow", "TOWING", &["TOWING", "FLAT_TIRE"]))
            .with_provider(ProviderProfile::new("p-tire", "FLAT_TIRE", &["FLAT_TIRE"]))
            .with_provider(ProviderProfile::new("p-lock", "LOCKOUT", &[]))
    }

    #[tokio::test]
    async fn resolves_by_primary_field_and_signup_list() {
        let found = directory()
            .resolve_providers_for_category(&Category::new("flat_tire"))
            .await
            .unwrap();

        let expected: BTreeSet<String> = ["p-tire", "p-tow"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found, ProviderMatch::Providers(expected));
    }

    #[tokio::test]
    async fn wildcard_resolves_to_all_categories() {
        let found = directory()
            .resolve_providers_for_category(&Category::new("Other"))
            .await
            .unwrap();

        assert_eq!(found, ProviderMatch::AllCategories);
        assert_eq!(found.provider_count(), None);
    }

    #[tokio::test]
    async fn known_categories_keep_order_without_duplicates() {
        let directory = StaticDirectory::new(vec![
            Category::new("TOWING"),
            Category::new("towing"),
            Category::new("LOCKOUT"),
        ]);

        assert_eq!(
            directory.list_known_categories().await.unwrap(),
            vec![Category::new("TOWING"), Category::new("LOCKOUT")]
        );
    }

    #[tokio::test]
    async fn provider_categories_for_unknown_provider_are_empty() {
        assert!(directory().categories_for_provider("nobody").await.unwrap().is_empty());
        assert_eq!(
            directory().categories_for_provider("p-tow").await.unwrap(),
            vec![Category::new("TOWING"), Category::new("FLAT_TIRE")]
        );
    }
}
