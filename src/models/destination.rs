use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::models::{category::Category, role::Role};

/// Where an envelope goes. Direct delivery and category broadcast never mix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Direct { role: Role, target_id: String },
    Broadcast { category: Category },
}

impl Destination {
    pub fn direct(role: Role, target_id: impl Into<String>) -> Self {
        Destination::Direct {
            role,
            target_id: target_id.into(),
        }
    }

    pub fn broadcast(category: Category) -> Self {
        Destination::Broadcast { category }
    }

    /// Exchange to publish on. Direct queues are reached through the default exchange.
    pub fn exchange(&self) -> String {
        match self {
            Destination::Direct { .. } => String::new(),
            Destination::Broadcast { category } => category.exchange_name(),
        }
    }

    /// Routing key for the publish. Fanout exchanges ignore it.
    pub fn routing_key(&self) -> String {
        match self {
            Destination::Direct { role, target_id } => direct_queue_name(*role, target_id),
            Destination::Broadcast { .. } => String::new(),
        }
    }

    /// Broker object name: the queue for direct delivery, the exchange for broadcast.
    pub fn name(&self) -> String {
        match self {
            Destination::Direct { role, target_id } => direct_queue_name(*role, target_id),
            Destination::Broadcast { category } => category.exchange_name(),
        }
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Destination::Direct { .. } => write!(f, "queue {}", self.name()),
            Destination::Broadcast { .. } => write!(f, "exchange {}", self.name()),
        }
    }
}

pub fn direct_queue_name(role: Role, target_id: &str) -> String {
    format!("notifications_{}_{}", role, target_id)
}
