//! Classification and orchestration for the intent bot.
//!
//! - `llm` / `gigachat`: chat-completions client behind the `LlmClient` trait,
//!   with the response-envelope adapter at the boundary.
//! - `classifier`: the `ClassificationGateway` contract and its model-backed
//!   implementation (one silent re-authentication, never fails).
//! - `runtime`: the slot-filling orchestrator that turns one inbound message
//!   into metadata writes and at most one outbound reply.
//!
//! The model only proposes a classification. Whether a dialog is resolved,
//! questioned further or left alone is decided by the flow engine in core.

pub mod classifier;
pub mod gigachat;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod runtime;

pub use classifier::{
    gateway_from_config, ClassificationGateway, LlmClassifier, SamplingOptions,
    UnavailableClassifier,
};
pub use gigachat::{GigaChatClient, GigaChatConfig};
pub use runtime::{
    BotContext, HandleReport, InboundMessage, MessageOutcome, RuntimeError, SlotFillingRuntime,
};
