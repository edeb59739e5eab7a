//! Broker client: publish on the gateway side, push-receive on the worker side.
//!
//! The broker is treated as a generic durable work queue:
//! - `Publisher` hands a message over and returns its broker-assigned id
//! - `PushHandler` receives deliveries and answers with an `AckDecision`
//!
//! Implementations:
//! - `pubsub`: Google Pub/Sub REST publisher (or its emulator)
//! - `memory`: in-process at-least-once broker with ack deadlines
//! - `envelope`: Pub/Sub push request body, decoded into a `Delivery`

pub mod envelope;
pub mod memory;
pub mod pubsub;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PublishError;

pub use envelope::{EnvelopeError, PushEnvelope};
pub use memory::{BrokerStats, MemoryBroker};
pub use pubsub::PubSubPublisher;

/// Attribute carrying the tenant, so subscriptions can filter on it.
pub const TENANT_ATTRIBUTE: &str = "tenant_id";

/// A message ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One delivery attempt of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
    /// 1 on first delivery, incremented on each redelivery when known.
    pub delivery_attempt: u32,
}

/// The consumer's answer to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Done with this message; never deliver it again.
    Ack,
    /// Not done; deliver again once the ack deadline has passed.
    Nack,
}

/// Producer side of the broker. Must be safe for concurrent use.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message and wait until the broker has accepted it.
    /// Returns the broker-assigned message id.
    async fn publish(&self, message: OutboundMessage) -> Result<String, PublishError>;
}

/// Consumer side of the broker.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn push(&self, delivery: Delivery) -> AckDecision;
}
