use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    error::{NotifyError, Result},
    models::{category::Category, destination::Destination, role::Role},
};

pub const SCHEMA_VERSION: u32 = 1;

/// Event tag carried in the envelope's `type` field. Unknown tags are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    NewServiceRequest,
    ServiceStatus,
    ProviderArrival,
    FeedbackRequest,
    Notification,
    Other(String),
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::NewServiceRequest => "NEW_SERVICE_REQUEST",
            NotificationType::ServiceStatus => "SERVICE_STATUS",
            NotificationType::ProviderArrival => "PROVIDER_ARRIVAL",
            NotificationType::FeedbackRequest => "FEEDBACK_REQUEST",
            NotificationType::Notification => "NOTIFICATION",
            NotificationType::Other(tag) => tag,
        }
    }

    /// Picks the tag out of a caller payload's `type` field, if it has one.
    pub fn from_payload(data: &JsonValue) -> Self {
        data.get("type")
            .and_then(|v| v.as_str())
            .map(NotificationType::from)
            .unwrap_or(NotificationType::Notification)
    }
}

impl From<&str> for NotificationType {
    fn from(value: &str) -> Self {
        match value {
            "NEW_SERVICE_REQUEST" => NotificationType::NewServiceRequest,
            "SERVICE_STATUS" => NotificationType::ServiceStatus,
            "PROVIDER_ARRIVAL" => NotificationType::ProviderArrival,
            "FEEDBACK_REQUEST" => NotificationType::FeedbackRequest,
            "NOTIFICATION" => NotificationType::Notification,
            other => NotificationType::Other(other.to_string()),
        }
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        NotificationType::from(value.as_str())
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_str().to_string()
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Message body exchanged between publishers and consumers.
///
/// Exactly one of `target_id` and `category` is set. `timestamp` is stamped by
/// the publisher at send time, callers never supply it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Absent on bodies from older publishers. The publisher always sets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,

    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Interested provider for a category broadcast. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(default)]
    pub data: JsonValue,

    pub timestamp: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn new(
        notification_type: NotificationType,
        destination: &Destination,
        data: JsonValue,
    ) -> Self {
        let (role, target_id, category) = match destination {
            Destination::Direct { role, target_id } => (Some(*role), Some(target_id.clone()), None),
            Destination::Broadcast { category } => (None, None, Some(category.clone())),
        };

        Self {
            schema_version: SCHEMA_VERSION,
            message_id: Some(Uuid::new_v4()),
            notification_type,
            role,
            target_id,
            category,
            provider_id: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_provider_hint(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Refreshes the send time. Called by the publisher right before encoding.
    pub fn stamp(mut self) -> Self {
        self.timestamp = Utc::now();
        self
    }

    /// Recovers the destination, rejecting envelopes that are both or neither.
    pub fn route(&self) -> Result<Destination> {
        match (&self.target_id, &self.category) {
            (Some(_), Some(_)) => Err(NotifyError::InvalidEnvelope(
                "envelope carries both targetId and category".to_string(),
            )),
            (None, None) => Err(NotifyError::InvalidEnvelope(
                "envelope carries neither targetId nor category".to_string(),
            )),
            (Some(target_id), None) => Ok(Destination::direct(
                self.role.unwrap_or(Role::Client),
                target_id.clone(),
            )),
            (None, Some(category)) => Ok(Destination::broadcast(category.clone())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// What lands on the dead-letter queue once a delivery is given up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: Option<Uuid>,
    pub source_queue: String,
    pub original_body: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub failed_at: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_type_survives_round_trip() {
        let parsed: NotificationType = serde_json::from_value(json!("DRIVER_CANCELLED")).unwrap();
        assert_eq!(parsed, NotificationType::Other("DRIVER_CANCELLED".to_string()));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json!("DRIVER_CANCELLED"));
    }

    #[test]
    fn direct_envelope_serializes_camel_case_without_category() {
        let envelope = NotificationEnvelope::new(
            NotificationType::ServiceStatus,
            &Destination::direct(Role::Client, "c1"),
            json!({"status": "ACCEPTED"}),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["schemaVersion"], json!(1));
        assert_eq!(value["type"], json!("SERVICE_STATUS"));
        assert_eq!(value["targetId"], json!("c1"));
        assert!(value.get("category").is_none());
        assert!(value.get("messageId").is_some());
    }

    #[test]
    fn legacy_body_without_version_decodes() {
        let body = br#"{"type":"NEW_SERVICE_REQUEST","category":"towing","data":{"id":"s1"},"timestamp":"2024-01-01T00:00:00Z"}"#;
        let envelope = NotificationEnvelope::decode(body).unwrap();

        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.message_id, None);
        assert_eq!(envelope.category, Some(Category::new("TOWING")));
        assert_eq!(
            envelope.route().unwrap(),
            Destination::broadcast(Category::new("TOWING"))
        );
    }

    #[test]
    fn missing_message_id_stays_missing_across_decodes() {
        let body = br#"{"type":"NOTIFICATION","targetId":"c1","timestamp":"2024-01-01T00:00:00Z"}"#;

        assert_eq!(NotificationEnvelope::decode(body).unwrap().message_id, None);
        assert_eq!(NotificationEnvelope::decode(body).unwrap().message_id, None);
    }

    #[test]
    fn route_rejects_both_target_and_category() {
        let mut envelope = NotificationEnvelope::new(
            NotificationType::Notification,
            &Destination::direct(Role::Provider, "p1"),
            JsonValue::Null,
        );
        envelope.category = Some(Category::new("TOWING"));

        assert!(matches!(envelope.route(), Err(NotifyError::InvalidEnvelope(_))));

        envelope.category = None;
        envelope.target_id = None;
        assert!(matches!(envelope.route(), Err(NotifyError::InvalidEnvelope(_))));
    }

    #[test]
    fn payload_type_field_selects_notification_type() {
        assert_eq!(
            NotificationType::from_payload(&json!({"type": "PROVIDER_ARRIVAL"})),
            NotificationType::ProviderArrival
        );
        assert_eq!(
            NotificationType::from_payload(&json!({"foo": "bar"})),
            NotificationType::Notification
        );
    }
}
