//! In-memory broker with at-least-once push delivery.
//!
//! Published messages are buffered until a dispatcher is running, then pushed
//! concurrently to a [`PushHandler`]. A delivery that is not acked within the
//! ack deadline (nack, panic, or simply too slow) is pushed again with an
//! incremented attempt count once the deadline has passed. A handler that
//! overruns its deadline keeps running, so the same message can be in flight
//! twice at once, exactly as with a real broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AckDecision, Delivery, OutboundMessage, Publisher, PushHandler};
use crate::config::BrokerConfig;
use crate::error::PublishError;

/// Snapshot of broker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    /// Delivery attempts, first deliveries and redeliveries alike.
    pub delivered: u64,
    pub acked: u64,
    pub redelivered: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    redelivered: AtomicU64,
}

/// In-process broker. Create with [`MemoryBroker::new`], then attach a
/// consumer with [`MemoryBroker::spawn_dispatcher`].
pub struct MemoryBroker {
    ack_deadline: Duration,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    /// Unacked message id → current delivery attempt.
    outstanding: RwLock<HashMap<String, u32>>,
    idle: Notify,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            ack_deadline: config.ack_deadline,
            next_id: AtomicU64::new(0),
            tx,
            rx: Mutex::new(Some(rx)),
            outstanding: RwLock::new(HashMap::new()),
            idle: Notify::new(),
            shutdown,
            counters: Counters::default(),
        })
    }

    pub fn ack_deadline(&self) -> Duration {
        self.ack_deadline
    }

    /// Start pushing deliveries to `handler`.
    ///
    /// Returns `None` if a dispatcher was already started for this broker.
    pub fn spawn_dispatcher(self: &Arc<Self>, handler: Arc<dyn PushHandler>) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().ok().and_then(|mut guard| guard.take())?;
        let broker = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        Some(tokio::spawn(async move {
            info!(ack_deadline = ?broker.ack_deadline, "Memory broker dispatcher started");
            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some(delivery) = next else { break };
                        let broker = Arc::clone(&broker);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { broker.deliver(handler, delivery).await });
                    }
                    _ = shutdown.changed() => break,
                }
            }
            info!("Memory broker dispatcher stopped");
        }))
    }

    /// Stop accepting publishes and stop the dispatcher.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            redelivered: self.counters.redelivered.load(Ordering::Relaxed),
        }
    }

    /// Number of published messages not yet acked.
    pub async fn outstanding(&self) -> usize {
        self.outstanding.read().await.len()
    }

    /// Wait until every published message has been acked.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding.read().await.is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn deliver(self: Arc<Self>, handler: Arc<dyn PushHandler>, delivery: Delivery) {
        let started = Instant::now();
        let message_id = delivery.message_id.clone();
        let attempt = delivery.delivery_attempt;
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message_id, attempt, "Pushing delivery");

        // Run the handler on its own task so an overrun keeps going after
        // the deadline instead of being cancelled.
        let push = tokio::spawn({
            let delivery = delivery.clone();
            async move { handler.push(delivery).await }
        });

        let decision = match tokio::time::timeout(self.ack_deadline, push).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(message_id = %message_id, attempt, error = %e, "Push handler failed");
                AckDecision::Nack
            }
            Err(_) => {
                warn!(message_id = %message_id, attempt, "Ack deadline exceeded");
                AckDecision::Nack
            }
        };

        match decision {
            AckDecision::Ack => self.settle(&message_id, attempt).await,
            AckDecision::Nack => {
                tokio::time::sleep_until(started + self.ack_deadline).await;
                self.redeliver(delivery).await;
            }
        }
    }

    async fn settle(&self, message_id: &str, attempt: u32) {
        let mut outstanding = self.outstanding.write().await;
        if outstanding.get(message_id) != Some(&attempt) {
            debug!(message_id = %message_id, attempt, "Ignoring ack from superseded attempt");
            return;
        }
        outstanding.remove(message_id);
        self.counters.acked.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message_id, attempt, "Message acked");

        if outstanding.is_empty() {
            self.idle.notify_waiters();
        }
    }

    async fn redeliver(&self, mut delivery: Delivery) {
        if self.is_closed() {
            warn!(message_id = %delivery.message_id, "Broker closed, dropping redelivery");
            self.forget(&delivery.message_id).await;
            return;
        }
        delivery.delivery_attempt += 1;
        self.outstanding
            .write()
            .await
            .insert(delivery.message_id.clone(), delivery.delivery_attempt);
        self.counters.redelivered.fetch_add(1, Ordering::Relaxed);
        info!(
            message_id = %delivery.message_id,
            attempt = delivery.delivery_attempt,
            "Redelivering message"
        );
        if let Err(mpsc::error::SendError(delivery)) = self.tx.send(delivery) {
            warn!(message_id = %delivery.message_id, "Dispatcher gone, dropping redelivery");
            self.forget(&delivery.message_id).await;
        }
    }

    /// Drop a message that will never be delivered again.
    async fn forget(&self, message_id: &str) {
        let mut outstanding = self.outstanding.write().await;
        outstanding.remove(message_id);
        if outstanding.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<String, PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }

        let message_id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let delivery = Delivery {
            message_id: message_id.clone(),
            data: message.data,
            attributes: message.attributes,
            publish_time: Some(Utc::now()),
            delivery_attempt: 1,
        };

        self.outstanding.write().await.insert(message_id.clone(), 1);
        if self.tx.send(delivery).is_err() {
            self.outstanding.write().await.remove(&message_id);
            return Err(PublishError::Closed);
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message_id, "Message published to memory broker");
        Ok(message_id)
    }
}
