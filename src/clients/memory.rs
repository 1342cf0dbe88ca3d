//! In-process broker with RabbitMQ-like semantics for tests and local runs.
//!
//! Queues, fanout exchanges, bindings, per-delivery acks and requeue behave like
//! their AMQP counterparts. Every publish is also recorded so callers can
//! assert on what went where.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::{
    broker::{Broker, DeliveryStream, InboundMessage, OutboundMessage, QueueSpec},
    error::{NotifyError, Result},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone)]
struct Queued {
    body: Vec<u8>,
    message_id: Option<String>,
    redelivered: bool,
}

impl Queued {
    fn redelivery(self) -> Self {
        Self {
            redelivered: true,
            ..self
        }
    }
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Queued>,
    subscriber: Option<mpsc::UnboundedSender<Result<InboundMessage>>>,
}

struct Pending {
    queue: String,
    message: Queued,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, Vec<String>>,
    unacked: HashMap<u64, Pending>,
    declarations: HashMap<String, usize>,
    published: Vec<PublishedMessage>,
    next_tag: u64,
}

impl State {
    fn enqueue(&mut self, queue: &str, message: Queued) {
        let Some(state) = self.queues.get_mut(queue) else {
            debug!(queue, "Dropping message for undeclared queue");
            return;
        };

        if let Some(subscriber) = &state.subscriber {
            self.next_tag += 1;
            let tag = self.next_tag;
            let delivery = InboundMessage {
                delivery_tag: tag,
                body: message.body.clone(),
                message_id: message.message_id.clone(),
                redelivered: message.redelivered,
            };
            if subscriber.send(Ok(delivery)).is_ok() {
                self.unacked.insert(
                    tag,
                    Pending {
                        queue: queue.to_string(),
                        message,
                    },
                );
                return;
            }
            state.subscriber = None;
        }

        state.backlog.push_back(message);
    }
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    offline: AtomicBool,
    failures_remaining: AtomicU32,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `BrokerUnavailable` while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next `count` calls fail, then the broker recovers.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NotifyError::BrokerUnavailable(
                "in-memory broker is offline".to_string(),
            ));
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(NotifyError::BrokerUnavailable(
                "in-memory broker injected failure".to_string(),
            ));
        }

        Ok(())
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    pub async fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|p| p.exchange == exchange)
            .cloned()
            .collect()
    }

    pub async fn has_queue(&self, name: &str) -> bool {
        self.state.lock().await.queues.contains_key(name)
    }

    pub async fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().await.exchanges.contains_key(name)
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn bindings(&self, exchange: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of declare calls seen for a queue or exchange name.
    pub async fn declare_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .declarations
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Messages waiting in a queue that no consumer has taken yet.
    pub async fn queue_depth(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(name)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Pops the next waiting message, like `basic.get` with auto-ack.
    pub async fn get(&self, queue: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .queues
            .get_mut(queue)
            .and_then(|q| q.backlog.pop_front())
            .map(|queued| queued.body)
    }

    /// Ends every open delivery stream, as a dropped connection would.
    /// Unacknowledged deliveries go back to their queues.
    pub async fn disconnect_consumers(&self) {
        let mut state = self.state.lock().await;
        for queue in state.queues.values_mut() {
            queue.subscriber = None;
        }
        let pending: Vec<Pending> = state.unacked.drain().map(|(_, p)| p).collect();
        for p in pending {
            if let Some(queue) = state.queues.get_mut(&p.queue) {
                queue.backlog.push_front(p.message.redelivery());
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, name: &str, _spec: QueueSpec) -> Result<String> {
        self.check_available()?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        let mut state = self.state.lock().await;
        state.queues.entry(name.clone()).or_default();
        *state.declarations.entry(name.clone()).or_default() += 1;

        Ok(name)
    }

    async fn declare_fanout_exchange(&self, name: &str) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        state.exchanges.entry(name.to_string()).or_default();
        *state.declarations.entry(name.to_string()).or_default() += 1;

        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        if !state.queues.contains_key(queue) {
            return Err(NotifyError::BrokerUnavailable(format!(
                "no queue '{}' to bind",
                queue
            )));
        }
        let bound = state.exchanges.get_mut(exchange).ok_or_else(|| {
            NotifyError::BrokerUnavailable(format!("no exchange '{}' to bind to", exchange))
        })?;
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;

        let targets = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            state.exchanges.get(exchange).cloned().ok_or_else(|| {
                NotifyError::BrokerUnavailable(format!("no exchange '{}'", exchange))
            })?
        };

        for queue in &targets {
            state.enqueue(
                queue,
                Queued {
                    body: message.body.clone(),
                    message_id: message.message_id.clone(),
                    redelivered: false,
                },
            );
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message,
        });

        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        if !state.queues.contains_key(queue) {
            return Err(NotifyError::BrokerUnavailable(format!(
                "no queue '{}' to consume from",
                queue
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = match state.queues.get_mut(queue) {
            Some(q) => {
                q.subscriber = Some(tx);
                std::mem::take(&mut q.backlog)
            }
            None => VecDeque::new(),
        };
        for queued in backlog {
            state.enqueue(queue, queued);
        }

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| {
                NotifyError::BrokerUnavailable(format!("unknown delivery tag {}", delivery_tag))
            })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let pending = state.unacked.remove(&delivery_tag).ok_or_else(|| {
            NotifyError::BrokerUnavailable(format!("unknown delivery tag {}", delivery_tag))
        })?;

        if requeue {
            state.enqueue(&pending.queue, pending.message.redelivery());
        }

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    /// The in-memory broker is shared by every client in the process, so
    /// closing one client leaves the others connected.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
