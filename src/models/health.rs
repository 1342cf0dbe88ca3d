use std::{collections::BTreeMap, fmt::Display};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Ordered from best to worst so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Collaborators the notification engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    MessageBroker,
    Directory,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn reachable(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            detail: None,
            error: None,
        }
    }

    pub fn unreachable(error: impl Display) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            detail: None,
            error: Some(error.to_string()),
        }
    }

    /// Answering, but in a state where notifications may not reach anyone.
    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            response_time_ms: None,
            detail: Some(detail.into()),
            error: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: BTreeMap<Component, ComponentHealth>,
}

impl HealthCheckResponse {
    /// Overall status is the worst component status; no checks means healthy.
    pub fn from_checks(checks: BTreeMap<Component, ComponentHealth>) -> Self {
        let status = checks
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn worst_component_decides() {
        let checks = BTreeMap::from([
            (Component::MessageBroker, ComponentHealth::reachable(3)),
            (Component::Directory, ComponentHealth::degraded("no categories")),
        ]);
        assert_eq!(HealthCheckResponse::from_checks(checks).status, HealthStatus::Degraded);

        let checks = BTreeMap::from([
            (Component::MessageBroker, ComponentHealth::unreachable("refused")),
            (Component::Directory, ComponentHealth::degraded("no categories")),
        ]);
        assert_eq!(HealthCheckResponse::from_checks(checks).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn components_serialize_as_snake_case_keys() {
        let checks = BTreeMap::from([(Component::MessageBroker, ComponentHealth::reachable(1))]);
        let value = serde_json::to_value(HealthCheckResponse::from_checks(checks)).unwrap();

        assert_eq!(value["status"], json!("healthy"));
        assert_eq!(value["checks"]["message_broker"]["response_time_ms"], json!(1));
    }
}
