//! Long-running receiver for one direct queue or one set of category broadcasts.
//!
//! State flow: `Connecting -> Bound -> Consuming -> Processing -> Acked |
//! ProcessingFailed -> Consuming`, and `Stopped` on shutdown. A delivery that
//! keeps failing is requeued until the redelivery policy is exhausted, then
//! written to the dead-letter queue and acked.

use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    future::Future,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    broker::{DeliveryStream, InboundMessage, OutboundMessage},
    error::{NotifyError, Result},
    models::{
        category::Category,
        message::{DeadLetter, NotificationEnvelope},
        retry::{RedeliveryPolicy, RetryConfig},
        role::Role,
        status::{ConsumerState, DeliveryDecision},
    },
    topology::TopologyManager,
    utils::retry_with_backoff_if,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Sole reader of `notifications_<role>_<target_id>`.
    Direct { role: Role, target_id: String },
    /// Private queue bound to each category's fanout exchange.
    Broadcast {
        role: Role,
        target_id: String,
        categories: Vec<Category>,
    },
}

impl ConsumerMode {
    pub fn role(&self) -> Role {
        match self {
            ConsumerMode::Direct { role, .. } | ConsumerMode::Broadcast { role, .. } => *role,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            ConsumerMode::Direct { target_id, .. } | ConsumerMode::Broadcast { target_id, .. } => {
                target_id
            }
        }
    }

    fn consumer_tag(&self) -> String {
        format!("{}_{}_{}", self.role(), self.target_id(), uuid::Uuid::new_v4().simple())
    }
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()>;
}

/// Prints every notification to standard output.
pub struct StdoutHandler {
    role: Role,
}

impl StdoutHandler {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

#[async_trait]
impl NotificationHandler for StdoutHandler {
    async fn handle(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        let rendered = serde_json::to_string_pretty(envelope)?;

        println!("--- {} notification received ---", self.role);
        if let Some(provider_id) = &envelope.provider_id {
            println!("Provider ID: {}", provider_id);
        }
        println!("{}", rendered);
        println!("------------------------------------");

        Ok(())
    }
}

pub struct Consumer {
    topology: TopologyManager,
    mode: ConsumerMode,
    handler: Arc<dyn NotificationHandler>,
    policy: RedeliveryPolicy,
    retry_config: RetryConfig,
    attempts: HashMap<String, u32>,
    state: watch::Sender<ConsumerState>,
}

impl Consumer {
    pub fn new(
        topology: TopologyManager,
        mode: ConsumerMode,
        handler: Arc<dyn NotificationHandler>,
        policy: RedeliveryPolicy,
        retry_config: RetryConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);

        Self {
            topology,
            mode,
            handler,
            policy,
            retry_config,
            attempts: HashMap::new(),
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Consumer state changed");
        }
    }

    /// Consumes until `shutdown` resolves or the broker stays unreachable past
    /// the retry budget. A delivery already being processed when shutdown
    /// arrives is finished, including its ack, before the loop exits.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            self.set_state(ConsumerState::Connecting);

            let subscribed = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                subscribed = retry_with_backoff_if(
                    &self.retry_config,
                    || self.subscribe(),
                    NotifyError::is_retryable,
                ) => Some(subscribed),
            };

            let (queue, mut deliveries) = match subscribed {
                None => return self.stop().await,
                Some(Ok(bound)) => bound,
                Some(Err(e)) => {
                    error!(
                        role = %self.mode.role(),
                        target_id = self.mode.target_id(),
                        error = %e,
                        "Consumer could not bind, giving up"
                    );
                    self.set_state(ConsumerState::Stopped);
                    return Err(e);
                }
            };

            self.forget_unreachable_attempts();

            self.set_state(ConsumerState::Bound);
            info!(
                queue = %queue,
                role = %self.mode.role(),
                target_id = self.mode.target_id(),
                "Listening for notifications"
            );
            self.set_state(ConsumerState::Consuming);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = &mut shutdown => None,
                    next = deliveries.next() => Some(next),
                };

                match next {
                    None => return self.stop().await,
                    Some(Some(Ok(message))) => self.handle_delivery(&queue, message).await,
                    Some(Some(Err(e))) => {
                        warn!(queue = %queue, error = %e, "Delivery stream failed, reconnecting");
                        break;
                    }
                    Some(None) => {
                        info!(queue = %queue, "Delivery stream ended, reconnecting");
                        break;
                    }
                }
            }

            let pause = self.retry_config.delay_after(1);
            let stopped = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                _ = sleep(pause) => false,
            };
            if stopped {
                return self.stop().await;
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        info!(role = %self.mode.role(), target_id = self.mode.target_id(), "Consumer stopping");

        if let Err(e) = self.topology.broker().close().await {
            warn!(error = %e, "Failed to close broker connection cleanly");
        }
        self.set_state(ConsumerState::Stopped);

        Ok(())
    }

    /// Called after every (re)bind. A new private queue cannot redeliver what
    /// the old one held, so broadcast counters would never be cleared otherwise.
    /// A direct queue survives the reconnect and keeps its counters.
    fn forget_unreachable_attempts(&mut self) {
        if matches!(self.mode, ConsumerMode::Broadcast { .. }) && !self.attempts.is_empty() {
            debug!(dropped = self.attempts.len(), "Clearing redelivery counters of the old private queue");
            self.attempts.clear();
        }
    }

    async fn subscribe(&self) -> Result<(String, DeliveryStream)> {
        self.topology
            .ensure_dead_letter_queue(&self.policy.dead_letter_queue)
            .await?;

        let queue = match &self.mode {
            ConsumerMode::Direct { role, target_id } => {
                self.topology.ensure_direct_queue(*role, target_id).await?
            }
            ConsumerMode::Broadcast { categories, .. } => {
                self.topology.ensure_private_binding(categories).await?
            }
        };

        let deliveries = self
            .topology
            .broker()
            .consume(&queue.name, &self.mode.consumer_tag())
            .await?;

        Ok((queue.name, deliveries))
    }

    async fn handle_delivery(&mut self, queue: &str, message: InboundMessage) {
        self.set_state(ConsumerState::Processing);

        let (decision, key) = self.evaluate(&message).await;
        let broker = self.topology.broker().clone();

        match decision {
            DeliveryDecision::Ack => {
                if let Err(e) = broker.ack(message.delivery_tag).await {
                    warn!(queue, error = %e, "Failed to acknowledge message");
                }
                self.set_state(ConsumerState::Acked);
            }
            DeliveryDecision::Requeue { attempts } => {
                warn!(
                    queue,
                    attempts,
                    max_attempts = self.policy.max_attempts,
                    "Requeueing failed notification"
                );
                if let Err(e) = broker.reject(message.delivery_tag, true).await {
                    warn!(queue, error = %e, "Failed to requeue message");
                }
                self.set_state(ConsumerState::ProcessingFailed);
            }
            DeliveryDecision::DeadLetter { attempts, reason } => {
                match self.dead_letter(queue, &message.body, attempts, &reason).await {
                    Ok(()) => {
                        if let Some(key) = &key {
                            self.attempts.remove(key);
                        }
                        if let Err(e) = broker.ack(message.delivery_tag).await {
                            warn!(queue, error = %e, "Failed to acknowledge dead-lettered message");
                        }
                    }
                    Err(e) => {
                        error!(queue, error = %e, "Dead-letter publish failed, requeueing instead");
                        if let Err(e) = broker.reject(message.delivery_tag, true).await {
                            warn!(queue, error = %e, "Failed to requeue message");
                        }
                    }
                }
                self.set_state(ConsumerState::ProcessingFailed);
            }
        }

        self.set_state(ConsumerState::Consuming);
    }

    /// Runs the handler and decides the delivery's fate. Also returns the key
    /// attempts are counted under.
    async fn evaluate(&mut self, message: &InboundMessage) -> (DeliveryDecision, Option<String>) {
        let envelope = match NotificationEnvelope::decode(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Undecodable notification, dead-lettering");
                return (
                    DeliveryDecision::DeadLetter {
                        attempts: 1,
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        };

        if let Err(e) = envelope.route() {
            warn!(message_id = ?envelope.message_id, error = %e, "Misrouted notification, dead-lettering");
            return (
                DeliveryDecision::DeadLetter {
                    attempts: 1,
                    reason: e.to_string(),
                },
                None,
            );
        }

        let key = attempt_key(message, &envelope);

        debug!(
            attempt_key = %key,
            notification_type = %envelope.notification_type,
            redelivered = message.redelivered,
            "Processing notification"
        );

        match self.handler.handle(&envelope).await {
            Ok(()) => {
                self.attempts.remove(&key);
                (DeliveryDecision::Ack, Some(key))
            }
            Err(e) => {
                let failure = NotifyError::ConsumerProcessing(e.to_string());
                let attempts = {
                    let count = self.attempts.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };

                warn!(
                    attempt_key = %key,
                    attempts,
                    error = %failure,
                    "Notification handler failed"
                );

                let decision = if self.policy.exhausted(attempts) {
                    DeliveryDecision::DeadLetter {
                        attempts,
                        reason: failure.to_string(),
                    }
                } else {
                    DeliveryDecision::Requeue { attempts }
                };
                (decision, Some(key))
            }
        }
    }

    async fn dead_letter(&self, queue: &str, body: &[u8], attempts: u32, reason: &str) -> Result<()> {
        let message_id = NotificationEnvelope::decode(body)
            .ok()
            .and_then(|envelope| envelope.message_id);

        let record = DeadLetter {
            message_id,
            source_queue: queue.to_string(),
            original_body: String::from_utf8_lossy(body).into_owned(),
            failure_reason: reason.to_string(),
            attempts,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let payload = serde_json::to_vec(&record)?;
        let dead_letter_queue = self.policy.dead_letter_queue.clone();

        retry_with_backoff_if(
            &self.retry_config,
            || {
                let message = OutboundMessage::json(payload.clone()).persistent();
                let dead_letter_queue = &dead_letter_queue;
                async move {
                    self.topology
                        .broker()
                        .publish("", dead_letter_queue, message)
                        .await
                }
            },
            NotifyError::is_retryable,
        )
        .await?;

        warn!(
            source_queue = queue,
            dead_letter_queue = %self.policy.dead_letter_queue,
            attempts,
            reason,
            "Notification dead-lettered"
        );

        Ok(())
    }
}

/// Identity redeliveries are counted under: the envelope's message id, else the
/// AMQP `message-id` property, else a hash of the body. Stable across
/// redeliveries of the same message.
fn attempt_key(message: &InboundMessage, envelope: &NotificationEnvelope) -> String {
    if let Some(id) = envelope.message_id {
        return id.to_string();
    }
    if let Some(id) = &message.message_id {
        return id.clone();
    }

    let mut hasher = DefaultHasher::new();
    message.body.hash(&mut hasher);
    format!("body-{:016x}", hasher.finish())
}
