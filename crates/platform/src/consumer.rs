use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use intentbot_core::config::AppConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventContext, EventDispatcher, UpdateEnvelope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

/// Durable per-bot queue bound to the updates exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueBinding {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub message_ttl_ms: u64,
}

impl QueueBinding {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            url: config.queue.url.clone(),
            exchange: config.queue.exchange.clone(),
            queue: config.queue_name(),
            routing_key: config.routing_key(),
            message_ttl_ms: config.queue.message_ttl_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Fixed-interval reconnect. `max_reconnects: None` retries forever.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_reconnects: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), max_reconnects: None }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.queue.reconnect_interval_secs),
            max_reconnects: None,
        }
    }

    fn exhausted(&self, reconnects: u32) -> bool {
        self.max_reconnects.is_some_and(|max| reconnects >= max)
    }
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Short label for logs.
    fn kind(&self) -> &'static str;
    async fn connect(&self, binding: &QueueBinding) -> Result<(), TransportError>;
    async fn next_delivery(&self) -> Result<Option<Delivery>, TransportError>;
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport with no broker behind it; the delivery stream is always closed.
#[derive(Default)]
pub struct NoopQueueTransport;

#[async_trait]
impl QueueTransport for NoopQueueTransport {
    fn kind(&self) -> &'static str {
        "noop"
    }

    async fn connect(&self, _binding: &QueueBinding) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>, TransportError> {
        Ok(None)
    }

    async fn ack(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn nack(&self, _delivery_tag: u64, _requeue: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Handler failed; the broker redelivers.
    Requeue,
    /// Payload can never be handled.
    Reject,
}

pub struct QueueConsumer {
    transport: Arc<dyn QueueTransport>,
    dispatcher: EventDispatcher,
    binding: QueueBinding,
    reconnect_policy: ReconnectPolicy,
}

impl QueueConsumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        dispatcher: EventDispatcher,
        binding: QueueBinding,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, binding, reconnect_policy }
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Consumes until the delivery stream closes. Transport failures trigger
    /// reconnect-and-resubscribe after the fixed interval.
    pub async fn run(&self) {
        let mut reconnects = 0;
        loop {
            match self.connect_and_consume(reconnects).await {
                Ok(()) => return,
                Err(transport_error) => {
                    warn!(
                        event_name = "queue.transport.failed",
                        reconnects,
                        queue = %self.binding.queue,
                        error = %transport_error,
                        "queue transport failed"
                    );
                    if self.reconnect_policy.exhausted(reconnects) {
                        warn!(
                            event_name = "queue.transport.gave_up",
                            reconnects,
                            "queue reconnects exhausted; continuing process without crash"
                        );
                        return;
                    }
                    if !self.reconnect_policy.interval.is_zero() {
                        tokio::time::sleep(self.reconnect_policy.interval).await;
                    }
                    reconnects += 1;
                }
            }
        }
    }

    async fn connect_and_consume(&self, reconnects: u32) -> Result<(), TransportError> {
        info!(
            event_name = "queue.transport.connecting",
            reconnects,
            transport = self.transport.kind(),
            queue = %self.binding.queue,
            exchange = %self.binding.exchange,
            routing_key = %self.binding.routing_key,
            "subscribing to update queue"
        );
        self.transport.connect(&self.binding).await?;

        loop {
            let Some(delivery) = self.transport.next_delivery().await? else {
                info!(event_name = "queue.transport.closed", "update stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            match self.process(&delivery).await {
                Disposition::Ack => self.transport.ack(delivery.delivery_tag).await?,
                Disposition::Requeue => self.transport.nack(delivery.delivery_tag, true).await?,
                Disposition::Reject => self.transport.nack(delivery.delivery_tag, false).await?,
            }
        }
    }

    /// Decides how a single delivery is settled.
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        let correlation_id = format!("delivery-{}", delivery.delivery_tag);
        let envelope = match UpdateEnvelope::from_slice(&delivery.body) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    event_name = "ingress.update.malformed",
                    correlation_id = %correlation_id,
                    routing_key = %delivery.routing_key,
                    error = %error,
                    "rejecting undecodable update"
                );
                return Disposition::Reject;
            }
        };

        info!(
            event_name = "ingress.update.received",
            correlation_id = %correlation_id,
            event_type = %envelope.event_type,
            routing_key = %delivery.routing_key,
            "received platform update"
        );

        let ctx = EventContext { correlation_id: correlation_id.clone() };
        match self.dispatcher.dispatch(&envelope, &ctx).await {
            Ok(result) => {
                debug!(
                    event_name = "ingress.update.settled",
                    correlation_id = %correlation_id,
                    handled = result.handled(),
                    "update handled"
                );
                Disposition::Ack
            }
            Err(error) if error.is_permanent() => {
                warn!(
                    event_name = "ingress.update.rejected",
                    correlation_id = %correlation_id,
                    event_type = %envelope.event_type,
                    error = %error,
                    "update cannot succeed on redelivery; rejecting"
                );
                Disposition::Reject
            }
            Err(error) => {
                warn!(
                    event_name = "ingress.update.failed",
                    correlation_id = %correlation_id,
                    event_type = %envelope.event_type,
                    error = %error,
                    "update handling failed; requeueing"
                );
                Disposition::Requeue
            }
        }
    }
}
