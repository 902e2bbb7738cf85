pub mod audit;
pub mod classifier;
pub mod config;
pub mod constraints;
pub mod errors;
pub mod fields;
pub mod flows;
pub mod output;
pub mod readiness;
pub mod registry;
pub mod session;

pub use classifier::{Classification, ClassificationRule, IntentCategory, IntentClassifier};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use constraints::{ConstraintEngine, ConstraintFinding, DeterministicConstraintEngine, Severity};
pub use errors::{ApplicationError, DomainError, InputValidationError, InterfaceError};
pub use fields::{BudgetRange, CollectionStage, FieldKind, FieldMap, FieldType, FieldValue};
pub use flows::{IntakeSignal, IntakeState};
pub use output::{IntakeResult, OutcomeStatus, OutputBuilder, RecommendedAction};
pub use readiness::{ReadinessEvaluator, ReadinessStatus, ReadinessVerdict};
pub use registry::{FieldDef, FieldRegistry};
pub use session::{ChannelMeta, IntakeEngine, Session, TurnInput, TurnOutcome};
