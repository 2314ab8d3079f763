use std::sync::Arc;

use chrono::Utc;
use intentbot_core::audit::{AuditContext, AuditSink};
use intentbot_core::config::AppConfig;
use intentbot_core::flows::{FlowContext, FlowTransitionError};
use intentbot_core::platform::PlatformError;
use intentbot_core::{
    ApplicationError, ClassificationResult, ClassificationStatus, ConversationStateStore, ConversationTurn,
    DialogId, DialogPhase, DialogState, FlowAction, FlowEngine, FlowEvent, IntentCatalog,
    MessageId, ResponseComposer, SessionId, SlotFillingFlow, StallReason, UserId, WriteFailure,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::ClassificationGateway;

const LOGGED_CONTENT_CHARS: usize = 100;

/// Bot identity and behaviour switches, fixed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotContext {
    pub bot_user_id: UserId,
    /// Send follow-up questions for incomplete classifications.
    pub auto_ask: bool,
    pub max_questions: usize,
    pub context_window: usize,
}

impl BotContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bot_user_id: UserId(config.bot.user_id.clone()),
            auto_ask: config.bot.auto_handle,
            max_questions: config.bot.max_questions as usize,
            context_window: config.bot.context_window as usize,
        }
    }
}

/// A `message.create` event reduced to what orchestration needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    pub sender_id: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The bot's own message.
    Ignored,
    AlreadyCategorized { category: String },
    Resolved { intent: String },
    QuestionAsked { intent: String, session_id: SessionId },
    Stalled { intent: String, reason: StallReason },
    Fallback,
}

impl MessageOutcome {
    pub fn handled(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Result of one orchestration step. Writes that failed along the way are
/// listed but never undo what was already done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleReport {
    pub outcome: MessageOutcome,
    pub write_failures: Vec<WriteFailure>,
}

impl HandleReport {
    fn clean(outcome: MessageOutcome) -> Self {
        Self { outcome, write_failures: Vec::new() }
    }

    pub fn is_partial(&self) -> bool {
        !self.write_failures.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to deliver reply to dialog {dialog_id}: {source}")]
    Delivery { dialog_id: DialogId, source: PlatformError },
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Delivery { source, .. } => Self::from(source),
            RuntimeError::Flow(error) => Self::Flow(error),
        }
    }
}

/// Per-dialog slot-filling orchestrator.
///
/// Every collaborator is passed in at construction; nothing is looked up from
/// process-wide state.
pub struct SlotFillingRuntime {
    bot: BotContext,
    state: ConversationStateStore,
    gateway: Arc<dyn ClassificationGateway>,
    catalog: Arc<IntentCatalog>,
    composer: ResponseComposer,
    engine: FlowEngine<SlotFillingFlow>,
    audit: Arc<dyn AuditSink>,
}

struct Step {
    dialog: DialogState,
    session: Option<SessionId>,
    write_failures: Vec<WriteFailure>,
}

impl Step {
    fn record(&mut self, result: Result<(), WriteFailure>) {
        if let Err(failure) = result {
            self.write_failures.push(failure);
        }
    }

    /// The active session, only while a clarification loop is running.
    fn active_session(&self) -> Option<SessionId> {
        if self.dialog.bot_handling {
            self.dialog.conversation_id.clone()
        } else {
            None
        }
    }
}

impl SlotFillingRuntime {
    pub fn new(
        bot: BotContext,
        state: ConversationStateStore,
        gateway: Arc<dyn ClassificationGateway>,
        catalog: Arc<IntentCatalog>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            bot,
            state,
            gateway,
            catalog,
            composer: ResponseComposer::default(),
            engine: FlowEngine::default(),
            audit,
        }
    }

    pub fn with_composer(mut self, composer: ResponseComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn bot(&self) -> &BotContext {
        &self.bot
    }

    pub async fn handle_message(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<HandleReport, RuntimeError> {
        if message.sender_id == self.bot.bot_user_id.0 {
            debug!(
                event_name = "orchestrator.message.ignored",
                correlation_id,
                dialog_id = %message.dialog_id,
                "skipping the bot's own message"
            );
            return Ok(HandleReport::clean(MessageOutcome::Ignored));
        }

        info!(
            event_name = "orchestrator.message.received",
            correlation_id,
            dialog_id = %message.dialog_id,
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            content = %truncate(&message.content),
            "handling dialog message"
        );

        let audit = AuditContext::new(
            Some(message.dialog_id.clone()),
            Some(message.message_id.clone()),
            correlation_id,
            self.bot.bot_user_id.0.clone(),
        );
        let dialog = self.state.dialog_state(&message.dialog_id).await;
        let phase = DialogPhase::of(&dialog);
        let mut step = Step { dialog, session: None, write_failures: Vec::new() };

        let received = self.engine.apply_with_audit(
            &phase,
            &FlowEvent::MessageReceived,
            &self.flow_context(&step, 0),
            self.audit.as_ref(),
            &audit,
        )?;

        if phase == DialogPhase::Resolved {
            let category = step.dialog.category.clone().unwrap_or_default();
            info!(
                event_name = "orchestrator.dialog.already_categorized",
                correlation_id,
                dialog_id = %message.dialog_id,
                category = %category,
                "dialog already categorized, not reclassifying"
            );
            return Ok(HandleReport::clean(MessageOutcome::AlreadyCategorized { category }));
        }

        let mut context = Vec::new();
        for action in received.actions {
            match action {
                FlowAction::TagUserReply => {
                    step.session = step.active_session();
                    if let Some(session) = step.session.clone() {
                        let result = self.state.tag_user_reply(&message.message_id, &session).await;
                        step.record(result);
                    }
                }
                FlowAction::ClassifyWithSessionContext => {
                    if let Some(session) = step.session.clone() {
                        context = self.state.session_turns(&message.dialog_id, &session).await;
                    }
                }
                FlowAction::ClassifyWithDialogHistory => {
                    context =
                        self.state.recent_turns(&message.dialog_id, self.bot.context_window).await;
                }
                other => {
                    warn!(event_name = "orchestrator.action.unexpected", action = ?other, "ignoring action");
                }
            }
        }

        let result = self.classify(message, &context, correlation_id).await;

        let questions_asked = if result.status == ClassificationStatus::InsufficientData {
            self.state.bot_question_count(&message.dialog_id).await
        } else {
            0
        };
        let classified = self.engine.apply_with_audit(
            &phase,
            &FlowEvent::from(result.status),
            &self.flow_context(&step, questions_asked),
            self.audit.as_ref(),
            &audit,
        )?;

        let mut asked_in = None;
        for action in &classified.actions {
            match action {
                FlowAction::PersistCategory => {
                    let category = match result.status {
                        ClassificationStatus::UnknownIntent => self.catalog.default_intent().id.as_str(),
                        _ => result.intent.as_str(),
                    };
                    let outcome = self.state.set_category(&message.dialog_id, category).await;
                    step.record(outcome);
                }
                FlowAction::PersistLastIntent => {
                    let outcome = self.state.set_last_intent(&message.dialog_id, &result.intent).await;
                    step.record(outcome);
                }
                FlowAction::ClearBotHandling => {
                    let outcome = self.state.set_bot_handling(&message.dialog_id, false).await;
                    step.record(outcome);
                }
                FlowAction::SendSuccessReply => {
                    let text = self.composer.success_reply(&result.intent, &result.data);
                    self.send(&message.dialog_id, &text).await?;
                }
                FlowAction::SendFallbackReply => {
                    self.send(&message.dialog_id, &self.composer.fallback_reply()).await?;
                }
                FlowAction::EnsureSession => {
                    // A session id left behind by a failed send is reused on redelivery.
                    let session = match step.dialog.conversation_id.clone() {
                        Some(session) => session,
                        None => {
                            let session = SessionId::generate(&message.dialog_id, Utc::now());
                            let outcome = self.state.set_session_id(&message.dialog_id, &session).await;
                            step.record(outcome);
                            info!(
                                event_name = "orchestrator.session.started",
                                correlation_id,
                                dialog_id = %message.dialog_id,
                                session_id = %session,
                                "clarification session started"
                            );
                            session
                        }
                    };
                    step.session = Some(session);
                }
                FlowAction::SendQuestion => {
                    let question = self.composer.question(&result.data);
                    asked_in = match self.send(&message.dialog_id, &question).await? {
                        Some(question_id) => Some(question_id),
                        None => {
                            self.state
                                .find_sent_message(&message.dialog_id, &self.bot.bot_user_id, &question)
                                .await
                        }
                    };
                }
                FlowAction::TagQuestion => match (&asked_in, &step.session) {
                    (Some(question_id), Some(session)) => {
                        let outcome =
                            self.state.tag_bot_question(question_id, &result.intent, session).await;
                        step.record(outcome);
                    }
                    _ => {
                        error!(
                            event_name = "orchestrator.question.untagged",
                            correlation_id,
                            dialog_id = %message.dialog_id,
                            "question id unknown; it will not count toward the question budget"
                        );
                    }
                },
                FlowAction::SetBotHandling => {
                    let outcome = self.state.set_bot_handling(&message.dialog_id, true).await;
                    step.record(outcome);
                }
                FlowAction::TagUserReply
                | FlowAction::ClassifyWithSessionContext
                | FlowAction::ClassifyWithDialogHistory => {
                    warn!(event_name = "orchestrator.action.unexpected", action = ?action, "ignoring action");
                }
            }
        }

        let outcome = match (result.status, classified.stalled, step.session) {
            (ClassificationStatus::Success, _, _) => MessageOutcome::Resolved { intent: result.intent },
            (ClassificationStatus::UnknownIntent, _, _) => MessageOutcome::Fallback,
            (ClassificationStatus::InsufficientData, Some(reason), _) => {
                MessageOutcome::Stalled { intent: result.intent, reason }
            }
            (ClassificationStatus::InsufficientData, None, Some(session_id)) => {
                MessageOutcome::QuestionAsked { intent: result.intent, session_id }
            }
            (ClassificationStatus::InsufficientData, None, None) => {
                return Err(RuntimeError::Flow(FlowTransitionError::InvalidTransition {
                    phase,
                    event: FlowEvent::ClassifiedInsufficientData,
                }))
            }
        };

        if !step.write_failures.is_empty() {
            warn!(
                event_name = "orchestrator.step.partial",
                correlation_id,
                dialog_id = %message.dialog_id,
                failed_writes = step.write_failures.len(),
                "step completed with failed metadata writes"
            );
        }
        info!(
            event_name = "orchestrator.step.completed",
            correlation_id,
            dialog_id = %message.dialog_id,
            outcome = ?outcome,
            "message handled"
        );

        Ok(HandleReport { outcome, write_failures: step.write_failures })
    }

    fn flow_context(&self, step: &Step, questions_asked: usize) -> FlowContext {
        FlowContext {
            bot_handling: step.dialog.bot_handling,
            has_session: step.dialog.conversation_id.is_some(),
            questions_asked,
            max_questions: self.bot.max_questions,
            auto_ask: self.bot.auto_ask,
        }
    }

    async fn classify(
        &self,
        message: &InboundMessage,
        context: &[ConversationTurn],
        correlation_id: &str,
    ) -> ClassificationResult {
        let result = self.gateway.classify(&message.content, context, &self.catalog).await;
        info!(
            event_name = "orchestrator.classification.completed",
            correlation_id,
            dialog_id = %message.dialog_id,
            status = result.status.as_str(),
            intent = %result.intent,
            context_turns = context.len(),
            error = result.error.as_deref().unwrap_or(""),
            "classification completed"
        );
        result
    }

    async fn send(&self, dialog_id: &DialogId, text: &str) -> Result<Option<MessageId>, RuntimeError> {
        let sent = self
            .state
            .platform()
            .send_message(dialog_id, &self.bot.bot_user_id, text)
            .await
            .map_err(|source| RuntimeError::Delivery { dialog_id: dialog_id.clone(), source })?;
        debug!(
            event_name = "orchestrator.reply.sent",
            dialog_id = %dialog_id,
            content = %truncate(text),
            "reply sent"
        );
        Ok(sent.message_id)
    }
}

fn truncate(content: &str) -> String {
    content.chars().take(LOGGED_CONTENT_CHARS).collect()
}
