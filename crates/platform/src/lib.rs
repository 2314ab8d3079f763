//! Conversation-platform integration for the intent bot.
//!
//! - **Client** (`client`) - HTTP adapter implementing the core metadata,
//!   dialog and user-directory ports
//! - **Events** (`events`) - update envelope parsing and per-kind dispatch
//! - **Consumer** (`consumer`) - queue loop with ack/nack semantics and
//!   fixed-interval reconnect
//! - **AMQP** (`amqp`) - RabbitMQ transport behind the consumer
//!
//! ```text
//! Queue delivery → UpdateEnvelope → EventDispatcher → MessageService → orchestrator
//! ```

pub mod amqp;
pub mod client;
pub mod consumer;
pub mod events;

pub use amqp::AmqpQueueTransport;
pub use client::{PlatformClient, PlatformClientConfig};
pub use consumer::{
    Delivery, Disposition, NoopQueueTransport, QueueBinding, QueueConsumer, QueueTransport,
    ReconnectPolicy, TransportError,
};
pub use events::{
    default_dispatcher, EventContext, EventDispatcher, HandlerResult, MessageService,
    UpdateEnvelope, UpdateKind, UpdateMessage,
};
