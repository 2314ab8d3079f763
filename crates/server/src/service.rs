use std::sync::Arc;

use async_trait::async_trait;
use intentbot_agent::{InboundMessage, SlotFillingRuntime};
use intentbot_core::ApplicationError;
use intentbot_platform::events::EventHandlerError;
use intentbot_platform::{EventContext, HandlerResult, MessageService, UpdateMessage};
use tracing::{error, warn};

/// Routes `message.create` updates into the slot-filling runtime.
#[derive(Clone)]
pub struct RuntimeMessageService {
    runtime: Arc<SlotFillingRuntime>,
}

impl RuntimeMessageService {
    pub fn new(runtime: Arc<SlotFillingRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl MessageService for RuntimeMessageService {
    async fn handle_new_message(
        &self,
        message: &UpdateMessage,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let inbound = InboundMessage {
            message_id: message.message_id.clone(),
            dialog_id: message.dialog_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
        };

        match self.runtime.handle_message(&inbound, &ctx.correlation_id).await {
            Ok(report) => {
                if report.is_partial() {
                    warn!(
                        event_name = "orchestrator.message.partial",
                        correlation_id = %ctx.correlation_id,
                        dialog_id = %inbound.dialog_id,
                        write_failures = report.write_failures.len(),
                        "message handled with metadata write failures"
                    );
                }
                Ok(if report.outcome.handled() {
                    HandlerResult::Processed
                } else {
                    HandlerResult::Ignored
                })
            }
            Err(runtime_error) => {
                let failure = ApplicationError::from(runtime_error);
                error!(
                    event_name = "orchestrator.message.failed",
                    correlation_id = %ctx.correlation_id,
                    dialog_id = %inbound.dialog_id,
                    error_class = failure.class(),
                    transient = failure.is_transient(),
                    error = %failure,
                    "message handling failed"
                );
                if failure.is_transient() {
                    Err(EventHandlerError::Message(failure.to_string()))
                } else {
                    Err(EventHandlerError::Unrecoverable(failure.to_string()))
                }
            }
        }
    }
}
