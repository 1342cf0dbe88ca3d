//! Idempotent declaration of the queues and exchanges notifications travel through.
//!
//! Every `ensure_*` call re-issues its declare, so after a reconnect the next
//! publish or consume puts the topology back before using it.

use std::sync::Arc;

use tracing::debug;

use crate::{
    broker::{Broker, QueueSpec},
    error::Result,
    models::{
        category::Category,
        destination::{Destination, direct_queue_name},
        role::Role,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeRef {
    pub name: String,
}

#[derive(Clone)]
pub struct TopologyManager {
    broker: Arc<dyn Broker>,
}

impl TopologyManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Non-durable queue `notifications_<role>_<target_id>`.
    pub async fn ensure_direct_queue(&self, role: Role, target_id: &str) -> Result<QueueRef> {
        let name = direct_queue_name(role, target_id);
        let declared = self
            .broker
            .declare_queue(&name, QueueSpec::transient())
            .await?;

        debug!(queue = %declared, role = %role, target_id, "Direct queue ensured");

        Ok(QueueRef { name: declared })
    }

    /// Non-durable fanout exchange `<category>-notifications-exchange`.
    pub async fn ensure_broadcast_exchange(&self, category: &Category) -> Result<ExchangeRef> {
        let name = category.exchange_name();
        self.broker.declare_fanout_exchange(&name).await?;

        debug!(exchange = %name, category = %category, "Broadcast exchange ensured");

        Ok(ExchangeRef { name })
    }

    /// Declares whichever broker object `destination` publishes to.
    pub async fn ensure_destination(&self, destination: &Destination) -> Result<()> {
        match destination {
            Destination::Direct { role, target_id } => {
                self.ensure_direct_queue(*role, target_id).await?;
            }
            Destination::Broadcast { category } => {
                self.ensure_broadcast_exchange(category).await?;
            }
        }
        Ok(())
    }

    /// A fresh exclusive queue bound to every listed category exchange. Each call
    /// yields a new queue, so every caller gets its own copy of each broadcast.
    pub async fn ensure_private_binding(&self, categories: &[Category]) -> Result<QueueRef> {
        let queue = self.broker.declare_queue("", QueueSpec::private()).await?;

        for category in categories {
            let exchange = self.ensure_broadcast_exchange(category).await?;
            self.broker.bind_queue(&queue, &exchange.name).await?;
            debug!(queue = %queue, exchange = %exchange.name, "Private queue bound");
        }

        Ok(QueueRef { name: queue })
    }

    /// Durable queue that parks deliveries consumers gave up on.
    pub async fn ensure_dead_letter_queue(&self, name: &str) -> Result<QueueRef> {
        let name = self.broker.declare_queue(name, QueueSpec::durable()).await?;

        Ok(QueueRef { name })
    }
}
