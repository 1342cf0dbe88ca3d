use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::models::category::Category;

/// Read-only view of a persisted service request.
///
/// Only the fields routing needs are typed; everything else the record holds is
/// kept in `extra` so the broadcast carries the full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub id: String,

    #[serde(
        default,
        alias = "serviceCategory",
        deserialize_with = "one_or_many"
    )]
    pub service_categories: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ServiceSnapshot {
    pub fn new(id: impl Into<String>, categories: &[&str]) -> Self {
        Self {
            id: id.into(),
            service_categories: categories.iter().map(|c| c.to_string()).collect(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: JsonValue) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Routing category. Only the first listed category is used.
    pub fn routing_category(&self) -> Option<Category> {
        self.service_categories
            .first()
            .map(Category::new)
            .filter(|c| !c.is_empty())
    }

    pub fn to_payload(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null,
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(category) => vec![category],
        OneOrMany::Many(categories) => categories,
        OneOrMany::Null => Vec::new(),
    })
}
