use serde::{Deserialize, Serialize};

use crate::models::category::Category;

pub type ProviderId = String;

/// Routing-relevant slice of a provider record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub id: ProviderId,

    /// Primary field (`fieldId` in the identity store).
    pub field: Option<Category>,

    /// Categories chosen at signup.
    #[serde(default)]
    pub service_categories: Vec<Category>,
}

impl ProviderProfile {
    pub fn new(id: impl Into<String>, field: &str, extra_categories: &[&str]) -> Self {
        Self {
            id: id.into(),
            field: Some(Category::new(field)),
            service_categories: extra_categories.iter().map(Category::new).collect(),
        }
    }

    /// A provider matches its primary field and every category in its signup list.
    pub fn serves(&self, category: &Category) -> bool {
        self.field.as_ref() == Some(category) || self.service_categories.contains(category)
    }

    /// Primary field first, then the signup list, without duplicates.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.field.iter().cloned().collect();
        for category in &self.service_categories {
            if !categories.contains(category) {
                categories.push(category.clone());
            }
        }
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_primary_and_signup_categories() {
        let provider = ProviderProfile::new("p1", "TOWING", &["towing", "flat_tire"]);

        assert!(provider.serves(&Category::new("TOWING")));
        assert!(provider.serves(&Category::new("FLAT_TIRE")));
        assert!(!provider.serves(&Category::new("LOCKOUT")));
        assert_eq!(
            provider.categories(),
            vec![Category::new("TOWING"), Category::new("FLAT_TIRE")]
        );
    }
}
