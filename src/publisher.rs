use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    broker::{Broker, OutboundMessage},
    error::{NotifyError, Result},
    models::{
        category::Category,
        destination::Destination,
        message::{NotificationEnvelope, NotificationType},
        retry::RetryConfig,
        role::Role,
    },
    topology::TopologyManager,
    utils::retry_with_backoff_if,
};

/// Sends envelopes to direct queues and category exchanges.
///
/// Publishes are fire-and-forget: no publisher confirm is awaited. Broker
/// failures are retried with backoff and then surfaced as `BrokerUnavailable`;
/// encoding failures are surfaced at once.
#[derive(Clone)]
pub struct Publisher {
    topology: TopologyManager,
    retry_config: RetryConfig,
}

impl Publisher {
    pub fn new(topology: TopologyManager, retry_config: RetryConfig) -> Self {
        Self {
            topology,
            retry_config,
        }
    }

    fn broker(&self) -> &Arc<dyn Broker> {
        self.topology.broker()
    }

    pub async fn notify_client(&self, client_id: &str, data: JsonValue) -> Result<Uuid> {
        self.notify_direct(Role::Client, client_id, data).await
    }

    pub async fn notify_provider(&self, provider_id: &str, data: JsonValue) -> Result<Uuid> {
        self.notify_direct(Role::Provider, provider_id, data).await
    }

    pub async fn notify_admin(&self, admin_id: &str, data: JsonValue) -> Result<Uuid> {
        self.notify_direct(Role::Admin, admin_id, data).await
    }

    /// Direct delivery. The envelope type comes from the payload's `type` field.
    pub async fn notify_direct(&self, role: Role, target_id: &str, data: JsonValue) -> Result<Uuid> {
        let notification_type = NotificationType::from_payload(&data);
        let envelope =
            NotificationEnvelope::new(notification_type, &Destination::direct(role, target_id), data);

        self.publish(envelope).await
    }

    /// Broadcast to every consumer bound to `category`, naming the provider the
    /// message is meant for. The exchange still delivers to everyone.
    pub async fn send_category_notification(
        &self,
        category: &Category,
        target_provider_id: &str,
        data: JsonValue,
    ) -> Result<Uuid> {
        let notification_type = NotificationType::from_payload(&data);
        let envelope = NotificationEnvelope::new(
            notification_type,
            &Destination::broadcast(category.clone()),
            data,
        )
        .with_provider_hint(target_provider_id);

        self.publish(envelope).await
    }

    pub async fn broadcast(
        &self,
        category: &Category,
        notification_type: NotificationType,
        data: JsonValue,
    ) -> Result<Uuid> {
        let envelope = NotificationEnvelope::new(
            notification_type,
            &Destination::broadcast(category.clone()),
            data,
        );

        self.publish(envelope).await
    }

    /// Stamps, encodes and sends one envelope. Returns its message id.
    pub async fn publish(&self, envelope: NotificationEnvelope) -> Result<Uuid> {
        let destination = envelope.route()?;
        let mut envelope = envelope.stamp();
        let message_id = *envelope.message_id.get_or_insert_with(Uuid::new_v4);

        let body = envelope.encode().map_err(|e| {
            error!(
                message_id = %message_id,
                destination = %destination,
                error = %e,
                "Failed to encode notification, dropping it"
            );
            e
        })?;

        retry_with_backoff_if(
            &self.retry_config,
            || self.deliver(&destination, &body, message_id),
            NotifyError::is_retryable,
        )
        .await
        .map_err(|e| {
            error!(
                message_id = %message_id,
                destination = %destination,
                error = %e,
                "Failed to publish notification"
            );
            e
        })?;

        info!(
            message_id = %message_id,
            destination = %destination,
            notification_type = %envelope.notification_type,
            "Notification published"
        );

        Ok(message_id)
    }

    async fn deliver(&self, destination: &Destination, body: &[u8], message_id: Uuid) -> Result<()> {
        self.topology.ensure_destination(destination).await?;

        let message = OutboundMessage::json(body.to_vec()).with_message_id(message_id.to_string());

        self.broker()
            .publish(&destination.exchange(), &destination.routing_key(), message)
            .await?;

        debug!(message_id = %message_id, destination = %destination, "Publish handed to broker");

        Ok(())
    }
}
