use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{
    DialogPhase, FlowAction, FlowContext, FlowEvent, StallReason, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_phase(&self) -> DialogPhase;
    fn transition(
        &self,
        current: &DialogPhase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct SlotFillingFlow;

impl FlowDefinition for SlotFillingFlow {
    fn initial_phase(&self) -> DialogPhase {
        DialogPhase::NoCategory
    }

    fn transition(
        &self,
        current: &DialogPhase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_slot_filling(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_phase(&self) -> DialogPhase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: &DialogPhase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &DialogPhase,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                let mut event = audit
                    .event("flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event));
                if let Some(reason) = outcome.stalled {
                    event = event.with_metadata("stalled", format!("{reason:?}"));
                }
                sink.emit(event);
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "flow.transition_rejected",
                            AuditCategory::Flow,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SlotFillingFlow> {
    fn default() -> Self {
        Self::new(SlotFillingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: DialogPhase, event: FlowEvent },
}

fn transition_slot_filling(
    current: &DialogPhase,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use DialogPhase::{AwaitingSlotData, NoCategory, Resolved};
    use FlowAction::{
        ClassifyWithDialogHistory, ClassifyWithSessionContext, ClearBotHandling, EnsureSession,
        PersistCategory, PersistLastIntent, SendFallbackReply, SendQuestion, SendSuccessReply,
        SetBotHandling, TagQuestion, TagUserReply,
    };
    use FlowEvent::{
        ClassifiedInsufficientData, ClassifiedSuccess, ClassifiedUnknownIntent, MessageReceived,
    };

    let clear_handling = context.bot_handling.then_some(ClearBotHandling);
    let mut stalled = None;

    let (to, actions) = match (current, event) {
        (Resolved, MessageReceived) => (Resolved, Vec::new()),
        (NoCategory | AwaitingSlotData, MessageReceived) => {
            if context.bot_handling && context.has_session {
                (*current, vec![TagUserReply, ClassifyWithSessionContext])
            } else {
                (*current, vec![ClassifyWithDialogHistory])
            }
        }
        (NoCategory | AwaitingSlotData, ClassifiedSuccess) => {
            let mut actions = vec![PersistCategory, PersistLastIntent];
            actions.extend(clear_handling);
            actions.push(SendSuccessReply);
            (Resolved, actions)
        }
        (NoCategory | AwaitingSlotData, ClassifiedUnknownIntent) => {
            let mut actions = vec![PersistCategory];
            actions.extend(clear_handling);
            actions.push(SendFallbackReply);
            (Resolved, actions)
        }
        (NoCategory | AwaitingSlotData, ClassifiedInsufficientData) => {
            if !context.auto_ask {
                stalled = Some(StallReason::AutoAskDisabled);
                (AwaitingSlotData, vec![PersistLastIntent])
            } else if !context.question_budget_left() {
                stalled = Some(StallReason::QuestionBudgetExhausted);
                let mut actions = vec![PersistLastIntent];
                actions.extend(clear_handling);
                (AwaitingSlotData, actions)
            } else {
                (
                    AwaitingSlotData,
                    vec![PersistLastIntent, EnsureSession, SendQuestion, TagQuestion, SetBotHandling],
                )
            }
        }
        (Resolved, _) => {
            return Err(FlowTransitionError::InvalidTransition { phase: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions, stalled })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::dialog::DialogId;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, SlotFillingFlow};
    use crate::flows::states::{DialogPhase, FlowAction, FlowContext, FlowEvent, StallReason};

    fn asking(questions_asked: usize) -> FlowContext {
        FlowContext { questions_asked, max_questions: 5, auto_ask: true, ..FlowContext::default() }
    }

    #[test]
    fn first_message_classifies_with_dialog_history() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&engine.initial_phase(), &FlowEvent::MessageReceived, &FlowContext::default())
            .expect("message accepted");

        assert_eq!(outcome.to, DialogPhase::NoCategory);
        assert_eq!(outcome.actions, vec![FlowAction::ClassifyWithDialogHistory]);
    }

    #[test]
    fn reply_inside_session_uses_session_context() {
        let engine = FlowEngine::default();
        let context = FlowContext { bot_handling: true, has_session: true, ..asking(1) };
        let outcome = engine
            .apply(&DialogPhase::AwaitingSlotData, &FlowEvent::MessageReceived, &context)
            .expect("reply accepted");

        assert_eq!(
            outcome.actions,
            vec![FlowAction::TagUserReply, FlowAction::ClassifyWithSessionContext]
        );
    }

    #[test]
    fn resolved_dialog_short_circuits() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&DialogPhase::Resolved, &FlowEvent::MessageReceived, &FlowContext::default())
            .expect("resolved dialogs accept messages");

        assert_eq!(outcome.to, DialogPhase::Resolved);
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn resolved_dialog_rejects_classification_events() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&DialogPhase::Resolved, &FlowEvent::ClassifiedSuccess, &FlowContext::default())
            .expect_err("resolved is terminal");

        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition {
                phase: DialogPhase::Resolved,
                event: FlowEvent::ClassifiedSuccess
            }
        );
    }

    #[test]
    fn success_inside_session_clears_bot_handling_before_reply() {
        let engine = FlowEngine::default();
        let context = FlowContext { bot_handling: true, has_session: true, ..asking(2) };
        let outcome = engine
            .apply(&DialogPhase::AwaitingSlotData, &FlowEvent::ClassifiedSuccess, &context)
            .expect("success resolves");

        assert_eq!(outcome.to, DialogPhase::Resolved);
        assert_eq!(
            outcome.actions,
            vec![
                FlowAction::PersistCategory,
                FlowAction::PersistLastIntent,
                FlowAction::ClearBotHandling,
                FlowAction::SendSuccessReply,
            ]
        );
    }

    #[test]
    fn insufficient_data_asks_with_session_created_before_send() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&DialogPhase::NoCategory, &FlowEvent::ClassifiedInsufficientData, &asking(0))
            .expect("question asked");

        assert_eq!(outcome.to, DialogPhase::AwaitingSlotData);
        assert_eq!(outcome.stalled, None);
        let ensure = outcome.actions.iter().position(|action| *action == FlowAction::EnsureSession);
        let send = outcome.actions.iter().position(|action| *action == FlowAction::SendQuestion);
        assert!(ensure < send);
        assert!(!outcome.actions.contains(&FlowAction::PersistCategory));
    }

    #[test]
    fn exhausted_budget_stalls_without_question() {
        let engine = FlowEngine::default();
        let context = FlowContext { bot_handling: true, has_session: true, ..asking(5) };
        let outcome = engine
            .apply(&DialogPhase::AwaitingSlotData, &FlowEvent::ClassifiedInsufficientData, &context)
            .expect("stall is a valid transition");

        assert_eq!(outcome.stalled, Some(StallReason::QuestionBudgetExhausted));
        assert_eq!(outcome.actions, vec![FlowAction::PersistLastIntent, FlowAction::ClearBotHandling]);
    }

    #[test]
    fn disabled_auto_ask_only_records_last_intent() {
        let engine = FlowEngine::new(SlotFillingFlow);
        let context = FlowContext { auto_ask: false, ..asking(0) };
        let outcome = engine
            .apply(&DialogPhase::NoCategory, &FlowEvent::ClassifiedInsufficientData, &context)
            .expect("stall is a valid transition");

        assert_eq!(outcome.stalled, Some(StallReason::AutoAskDisabled));
        assert_eq!(outcome.actions, vec![FlowAction::PersistLastIntent]);
    }

    #[test]
    fn unknown_intent_resolves_with_fallback() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&DialogPhase::NoCategory, &FlowEvent::ClassifiedUnknownIntent, &asking(0))
            .expect("unknown resolves");

        assert_eq!(outcome.to, DialogPhase::Resolved);
        assert_eq!(outcome.actions, vec![FlowAction::PersistCategory, FlowAction::SendFallbackReply]);
    }

    #[test]
    fn transitions_are_deterministic() {
        let engine = FlowEngine::default();
        let events = [FlowEvent::MessageReceived, FlowEvent::ClassifiedInsufficientData];

        let run = |engine: &FlowEngine<SlotFillingFlow>| {
            let mut phase = engine.initial_phase();
            let mut actions = Vec::new();
            for event in &events {
                let outcome = engine.apply(&phase, event, &asking(1)).expect("deterministic run");
                actions.push(outcome.actions);
                phase = outcome.to;
            }
            (phase, actions)
        };

        assert_eq!(run(&engine), run(&engine));
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit =
            AuditContext::new(Some(DialogId("dlg-9".to_owned())), None, "delivery-42", "slot-filling");

        let _ = engine
            .apply_with_audit(
                &DialogPhase::AwaitingSlotData,
                &FlowEvent::ClassifiedInsufficientData,
                &asking(5),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &DialogPhase::Resolved,
            &FlowEvent::ClassifiedSuccess,
            &asking(0),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(
            events[0].metadata.get("stalled").map(String::as_str),
            Some("QuestionBudgetExhausted")
        );
        assert_eq!(events[1].event_type, "flow.transition_rejected");
        assert_eq!(events[1].correlation_id, "delivery-42");
    }
}
