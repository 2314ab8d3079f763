use serde::{Deserialize, Serialize};

use crate::domain::classification::ClassificationStatus;
use crate::domain::dialog::DialogState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogPhase {
    NoCategory,
    AwaitingSlotData,
    Resolved,
}

impl DialogPhase {
    /// Phase implied by the persisted dialog keys. A recorded category is terminal.
    pub fn of(state: &DialogState) -> Self {
        if state.category.is_some() {
            Self::Resolved
        } else if state.bot_handling || state.last_intent.is_some() {
            Self::AwaitingSlotData
        } else {
            Self::NoCategory
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    MessageReceived,
    ClassifiedSuccess,
    ClassifiedInsufficientData,
    ClassifiedUnknownIntent,
}

impl From<ClassificationStatus> for FlowEvent {
    fn from(status: ClassificationStatus) -> Self {
        match status {
            ClassificationStatus::Success => Self::ClassifiedSuccess,
            ClassificationStatus::InsufficientData => Self::ClassifiedInsufficientData,
            ClassificationStatus::UnknownIntent => Self::ClassifiedUnknownIntent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub bot_handling: bool,
    pub has_session: bool,
    pub questions_asked: usize,
    pub max_questions: usize,
    pub auto_ask: bool,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self {
            bot_handling: false,
            has_session: false,
            questions_asked: 0,
            max_questions: 5,
            auto_ask: true,
        }
    }
}

impl FlowContext {
    pub fn question_budget_left(&self) -> bool {
        self.questions_asked < self.max_questions
    }
}

/// Side effects a transition asks the runtime to perform, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    TagUserReply,
    ClassifyWithSessionContext,
    ClassifyWithDialogHistory,
    PersistCategory,
    PersistLastIntent,
    ClearBotHandling,
    SendSuccessReply,
    SendFallbackReply,
    EnsureSession,
    SendQuestion,
    TagQuestion,
    SetBotHandling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StallReason {
    AutoAskDisabled,
    QuestionBudgetExhausted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogPhase,
    pub to: DialogPhase,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
    pub stalled: Option<StallReason>,
}
