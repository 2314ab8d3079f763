use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::consumer::{Delivery, QueueBinding, QueueTransport, TransportError};

const PREFETCH: u16 = 10;

struct Session {
    connection: Connection,
    channel: Channel,
}

/// RabbitMQ transport: declares the topic exchange and the durable per-bot
/// queue, binds them, then consumes with manual acknowledgement.
pub struct AmqpQueueTransport {
    consumer_tag: String,
    session: Mutex<Option<Session>>,
    consumer: Mutex<Option<Consumer>>,
}

impl AmqpQueueTransport {
    pub fn new(consumer_tag: impl Into<String>) -> Self {
        Self { consumer_tag: consumer_tag.into(), session: Mutex::new(None), consumer: Mutex::new(None) }
    }

    async fn channel(&self) -> Option<Channel> {
        self.session.lock().await.as_ref().map(|session| session.channel.clone())
    }
}

/// Queue arguments; messages older than the TTL are dropped by the broker.
pub fn queue_arguments(binding: &QueueBinding) -> FieldTable {
    let ttl = i64::try_from(binding.message_ttl_ms).unwrap_or(i64::MAX);
    let mut arguments = FieldTable::default();
    arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl));
    arguments
}

fn connect_error(error: lapin::Error) -> TransportError {
    TransportError::Connect(error.to_string())
}

#[async_trait]
impl QueueTransport for AmqpQueueTransport {
    fn kind(&self) -> &'static str {
        "amqp"
    }

    async fn connect(&self, binding: &QueueBinding) -> Result<(), TransportError> {
        self.disconnect().await.ok();

        let connection = Connection::connect(&binding.url, ConnectionProperties::default())
            .await
            .map_err(connect_error)?;
        let channel = connection.create_channel().await.map_err(connect_error)?;
        channel.basic_qos(PREFETCH, BasicQosOptions::default()).await.map_err(connect_error)?;

        channel
            .exchange_declare(
                &binding.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..ExchangeDeclareOptions::default() },
                FieldTable::default(),
            )
            .await
            .map_err(connect_error)?;
        channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions { durable: true, ..QueueDeclareOptions::default() },
                queue_arguments(binding),
            )
            .await
            .map_err(connect_error)?;
        channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(connect_error)?;

        let consumer = channel
            .basic_consume(
                &binding.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(connect_error)?;

        info!(
            event_name = "queue.amqp.subscribed",
            queue = %binding.queue,
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            consumer_tag = %self.consumer_tag,
            "amqp consumer subscribed"
        );
        *self.consumer.lock().await = Some(consumer);
        *self.session.lock().await = Some(Session { connection, channel });
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>, TransportError> {
        let mut guard = self.consumer.lock().await;
        let consumer =
            guard.as_mut().ok_or_else(|| TransportError::Receive("not connected".to_owned()))?;

        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                routing_key: delivery.routing_key.as_str().to_owned(),
                body: delivery.data,
            })),
            Some(Err(error)) => Err(TransportError::Receive(error.to_string())),
            // A broker-side cancel ends the stream; resubscribe rather than stop.
            None => Err(TransportError::Receive("consumer cancelled by broker".to_owned())),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let channel = self
            .channel()
            .await
            .ok_or_else(|| TransportError::Acknowledge("not connected".to_owned()))?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        let channel = self
            .channel()
            .await
            .ok_or_else(|| TransportError::Acknowledge("not connected".to_owned()))?;
        channel
            .basic_nack(delivery_tag, BasicNackOptions { requeue, ..BasicNackOptions::default() })
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.consumer.lock().await.take();
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        debug!(event_name = "queue.amqp.closing", "closing amqp channel");
        session
            .channel
            .close(200, "consumer stopping")
            .await
            .map_err(|error| TransportError::Disconnect(error.to_string()))?;
        session
            .connection
            .close(200, "consumer stopping")
            .await
            .map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}
