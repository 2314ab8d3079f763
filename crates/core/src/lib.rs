pub mod audit;
pub mod catalog;
pub mod compose;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod platform;
pub mod state;

pub use catalog::{CatalogError, FieldSpec, IntentCatalog, IntentDefinition, DEFAULT_INTENT_ID};
pub use compose::ResponseComposer;
pub use domain::classification::{ClassificationData, ClassificationResult, ClassificationStatus};
pub use domain::dialog::{
    ConversationTurn, DialogId, DialogState, MessageId, SessionId, TurnTags, UserId,
};
pub use errors::{ApplicationError, Exposure, InterfaceError};
pub use flows::{DialogPhase, FlowAction, FlowEngine, FlowEvent, SlotFillingFlow, StallReason};
pub use platform::{
    DialogPlatform, MetaEntry, MetaScope, MetadataStore, PlatformError, UserDirectory, UserLookup,
};
pub use state::{ConversationStateStore, WriteFailure};
