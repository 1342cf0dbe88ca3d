//! Broker seam shared by the topology manager, publisher and consumer.
//!
//! Implementations:
//! - `RabbitMqClient`: RabbitMQ over AMQP 0-9-1
//! - `InMemoryBroker`: in-process broker for tests and local runs

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

/// Declaration flags for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Per-target direct queue. Lives as long as the broker keeps it.
    pub fn transient() -> Self {
        Self {
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Server-named queue owned by one consumer connection.
    pub fn private() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub persistent: bool,
}

impl OutboundMessage {
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            body,
            message_id: None,
            persistent: false,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// The AMQP `message-id` property, when the publisher set one.
    pub message_id: Option<String>,
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, Result<InboundMessage>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue; an empty name asks the broker to pick one. Returns the
    /// queue's actual name.
    async fn declare_queue(&self, name: &str, spec: QueueSpec) -> Result<String>;

    async fn declare_fanout_exchange(&self, name: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Fire-and-forget publish. `exchange` is empty for the default exchange.
    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage)
    -> Result<()>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Establish the connection if needed and confirm it is usable.
    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
