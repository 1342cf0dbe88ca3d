use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

pub const WILDCARD_CATEGORY: &str = "OTHER";

/// Categories seeded into the identity store's field table.
pub const DEFAULT_CATEGORIES: [&str; 6] = [
    "TOWING",
    "FLAT_TIRE",
    "FUEL_DELIVERY",
    "LOCKOUT",
    "EMERGENCY",
    WILDCARD_CATEGORY,
];

/// A service type tag, stored upper-cased so `towing` and `TOWING` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD_CATEGORY
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fanout exchange shared by every consumer of this category.
    pub fn exchange_name(&self) -> String {
        format!("{}-notifications-exchange", self.0.to_lowercase())
    }

    pub fn defaults() -> Vec<Category> {
        DEFAULT_CATEGORIES.iter().map(Category::new).collect()
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Category::new(value)
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        Category::new(value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}
