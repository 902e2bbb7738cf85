mod machine;
mod model;

pub use machine::{
    IntakeEngine, TOOL_CONSTRAINT_EVALUATOR, TOOL_INTENT_CLASSIFIER, TOOL_READINESS_EVALUATOR,
};
pub use model::{
    AcceptedField, ChannelMeta, RejectedCandidate, Session, Turn, TurnInput, TurnOutcome,
};
