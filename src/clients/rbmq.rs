use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    broker::{Broker, DeliveryStream, InboundMessage, OutboundMessage, QueueSpec},
    config::Config,
    error::{NotifyError, Result},
    models::retry::Timeouts,
};

struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// One lazily opened connection and channel per process.
///
/// Every broker call takes the session lock for its full duration, so
/// concurrent publishers are serialised on the single channel. Any failure
/// drops the session and the next call reconnects.
pub struct RabbitMqClient {
    url: String,
    prefetch_count: u16,
    timeouts: Timeouts,
    session: Mutex<Option<Session>>,
}

impl RabbitMqClient {
    pub fn new(url: impl Into<String>, prefetch_count: u16, timeouts: Timeouts) -> Self {
        Self {
            url: url.into(),
            prefetch_count,
            timeouts,
            session: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.rabbitmq_url.clone(),
            config.prefetch_count,
            config.timeouts(),
        )
    }

    /// Builds the client and opens the session eagerly.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Self::from_config(config);
        client.ping().await?;
        Ok(client)
    }

    async fn open_session(&self) -> Result<Session> {
        info!("Connecting to RabbitMQ");

        let connection = timeout(
            self.timeouts.connect,
            Connection::connect(&self.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            NotifyError::BrokerUnavailable("Timed out connecting to RabbitMQ".to_string())
        })?
        .map_err(|e| NotifyError::broker("Failed to connect to RabbitMQ", e))?;

        debug!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| NotifyError::broker("RabbitMQ channel creation failed", e))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| NotifyError::broker("Failed to set up QoS", e))?;

        info!(prefetch_count = self.prefetch_count, "RabbitMQ channel ready");

        Ok(Session {
            connection,
            channel,
        })
    }

    /// Runs `op` against the shared channel under the session lock.
    ///
    /// With `open_if_missing` unset the call fails instead of reconnecting;
    /// acks must go to the channel that delivered the message.
    async fn with_channel<T, F, Fut>(&self, context: &str, open_if_missing: bool, op: F) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = std::result::Result<T, lapin::Error>>,
    {
        let mut guard = self.session.lock().await;

        let connected = guard.as_ref().is_some_and(Session::is_connected);
        if !connected {
            if !open_if_missing {
                *guard = None;
                return Err(NotifyError::BrokerUnavailable(format!(
                    "{}: channel is closed",
                    context
                )));
            }
            *guard = Some(self.open_session().await?);
        }

        let channel = match guard.as_ref() {
            Some(session) => session.channel.clone(),
            None => {
                return Err(NotifyError::BrokerUnavailable(format!(
                    "{}: no session",
                    context
                )));
            }
        };

        match timeout(self.timeouts.publish, op(channel)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(error = %e, context, "RabbitMQ operation failed, dropping session");
                *guard = None;
                Err(NotifyError::broker(context, e))
            }
            Err(_) => {
                warn!(context, "RabbitMQ operation timed out, dropping session");
                *guard = None;
                Err(NotifyError::BrokerUnavailable(format!("{}: timed out", context)))
            }
        }
    }
}

#[async_trait]
impl Broker for RabbitMqClient {
    async fn declare_queue(&self, name: &str, spec: QueueSpec) -> Result<String> {
        let name = name.to_string();

        let queue = self
            .with_channel("Failed to declare queue", true, move |channel| async move {
                channel
                    .queue_declare(
                        &name,
                        QueueDeclareOptions {
                            durable: spec.durable,
                            exclusive: spec.exclusive,
                            auto_delete: spec.auto_delete,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
            })
            .await?;

        let declared = queue.name().as_str().to_string();
        debug!(queue = %declared, "Queue declared");

        Ok(declared)
    }

    async fn declare_fanout_exchange(&self, name: &str) -> Result<()> {
        let name = name.to_string();

        self.with_channel("Failed to declare exchange", true, move |channel| async move {
            channel
                .exchange_declare(
                    &name,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions {
                        durable: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
        })
        .await
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        let queue = queue.to_string();
        let exchange = exchange.to_string();

        self.with_channel("Failed to bind queue", true, move |channel| async move {
            channel
                .queue_bind(
                    &queue,
                    &exchange,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
        })
        .await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        let exchange = exchange.to_string();
        let routing_key = routing_key.to_string();

        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_timestamp(Utc::now().timestamp().max(0) as u64);
        if let Some(message_id) = &message.message_id {
            properties = properties.with_message_id(message_id.as_str().into());
        }
        if message.persistent {
            properties = properties.with_delivery_mode(2);
        }

        self.with_channel("Failed to publish message", true, move |channel| async move {
            channel
                .basic_publish(
                    &exchange,
                    &routing_key,
                    BasicPublishOptions::default(),
                    &message.body,
                    properties,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let queue = queue.to_string();
        let consumer_tag = consumer_tag.to_string();

        let consumer = self
            .with_channel("Failed to create consumer", true, move |channel| async move {
                channel
                    .basic_consume(
                        &queue,
                        &consumer_tag,
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
            })
            .await?;

        let stream = consumer.map(|delivery| {
            delivery
                .map(|delivery| InboundMessage {
                    delivery_tag: delivery.delivery_tag,
                    message_id: delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string()),
                    body: delivery.data,
                    redelivered: delivery.redelivered,
                })
                .map_err(NotifyError::from)
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.with_channel("Failed to acknowledge message", false, move |channel| async move {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
        })
        .await
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.with_channel("Failed to reject message", false, move |channel| async move {
            channel
                .basic_reject(delivery_tag, BasicRejectOptions { requeue })
                .await
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_channel("RabbitMQ ping failed", true, |_channel| async {
            Ok::<(), lapin::Error>(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().await.take();

        if let Some(session) = session {
            if let Err(e) = session.channel.close(200, "Bye").await {
                debug!(error = %e, "Channel already closed");
            }
            if let Err(e) = session.connection.close(200, "Bye").await {
                debug!(error = %e, "Connection already closed");
            }
            info!("RabbitMQ connection closed");
        }

        Ok(())
    }
}
