use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use notify_service::{
    broker::Broker,
    clients::memory::InMemoryBroker,
    consumer::{Consumer, ConsumerMode, NotificationHandler},
    error::Result as NotifyResult,
    models::{
        message::NotificationEnvelope,
        retry::{RedeliveryPolicy, RetryConfig},
        status::ConsumerState,
    },
    publisher::Publisher,
    topology::TopologyManager,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};

pub const WAIT: Duration = Duration::from_secs(3);
pub const POLL: Duration = Duration::from_millis(10);
pub const DEAD_LETTER_QUEUE: &str = "notifications_dead_letter";

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    }
}

pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub topology: TopologyManager,
    pub publisher: Publisher,
}

impl Harness {
    pub fn new() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let shared: Arc<dyn Broker> = broker.clone();
        let topology = TopologyManager::new(shared);
        let publisher = Publisher::new(topology.clone(), fast_retry());

        Self {
            broker,
            topology,
            publisher,
        }
    }

    pub fn consumer(
        &self,
        mode: ConsumerMode,
        handler: Arc<dyn NotificationHandler>,
        max_attempts: u32,
    ) -> Consumer {
        Consumer::new(
            self.topology.clone(),
            mode,
            handler,
            RedeliveryPolicy::new(max_attempts, DEAD_LETTER_QUEUE),
            fast_retry(),
        )
    }
}

/// A consumer running on its own task, stopped through a oneshot.
pub struct RunningConsumer {
    pub state: watch::Receiver<ConsumerState>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<NotifyResult<()>>,
}

impl RunningConsumer {
    pub fn spawn(consumer: Consumer) -> Self {
        let state = consumer.subscribe_state();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(consumer.run(async move {
            let _ = stopped.await;
        }));

        Self { state, stop, task }
    }

    pub async fn spawn_consuming(consumer: Consumer) -> anyhow::Result<Self> {
        let mut running = Self::spawn(consumer);
        timeout(WAIT, running.state.wait_for(|s| *s == ConsumerState::Consuming)).await??;
        Ok(running)
    }

    pub async fn stop(self) -> anyhow::Result<NotifyResult<()>> {
        let _ = self.stop.send(());
        Ok(timeout(WAIT, self.task).await??)
    }

    pub async fn join(self) -> anyhow::Result<NotifyResult<()>> {
        Ok(timeout(WAIT, self.task).await??)
    }
}

/// Forwards every envelope to a channel. Fails the first `failures` calls.
pub struct RecordingHandler {
    seen: mpsc::UnboundedSender<NotificationEnvelope>,
    failures: AtomicU32,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        let (seen, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Self {
            seen,
            failures: AtomicU32::new(failures),
        });
        (handler, rx)
    }
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn handle(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        let _ = self.seen.send(envelope.clone());

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("downstream rejected notification"));
        }

        Ok(())
    }
}

pub async fn next_envelope(
    rx: &mut mpsc::UnboundedReceiver<NotificationEnvelope>,
) -> anyhow::Result<NotificationEnvelope> {
    timeout(WAIT, rx.recv())
        .await?
        .ok_or_else(|| anyhow!("handler channel closed"))
}

/// Waits for a message to land in a queue nobody consumes, then pops it.
pub async fn next_in_queue(broker: &InMemoryBroker, queue: &str) -> anyhow::Result<Vec<u8>> {
    timeout(WAIT, async {
        loop {
            if let Some(body) = broker.get(queue).await {
                return body;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .map_err(|_| anyhow!("nothing arrived on {}", queue))
}

pub async fn wait_until_acked(broker: &InMemoryBroker) -> anyhow::Result<()> {
    timeout(WAIT, async {
        while broker.unacked_count().await > 0 {
            tokio::time::sleep(POLL).await;
        }
    })
    .await?;
    Ok(())
}
