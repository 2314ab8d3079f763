pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, SlotFillingFlow};
pub use states::{DialogPhase, FlowAction, FlowContext, FlowEvent, StallReason, TransitionOutcome};
