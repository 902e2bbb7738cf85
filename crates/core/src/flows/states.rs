use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntakeState {
    #[serde(rename = "S0")]
    Initialization,
    #[serde(rename = "S1")]
    IntentClarification,
    #[serde(rename = "S2")]
    ContextCollection,
    #[serde(rename = "S3")]
    ConstraintEvaluation,
    #[serde(rename = "S4")]
    ReadinessAssessment,
    #[serde(rename = "S5")]
    Handoff,
    #[serde(rename = "stopped_informational")]
    StoppedInformational,
    #[serde(rename = "stopped_invalid")]
    StoppedInvalid,
    #[serde(rename = "stopped_not_a_fit")]
    StoppedNotAFit,
    #[serde(rename = "stopped_user_exit")]
    StoppedUserExit,
}

impl IntakeState {
    pub const ALL: [IntakeState; 10] = [
        Self::Initialization,
        Self::IntentClarification,
        Self::ContextCollection,
        Self::ConstraintEvaluation,
        Self::ReadinessAssessment,
        Self::Handoff,
        Self::StoppedInformational,
        Self::StoppedInvalid,
        Self::StoppedNotAFit,
        Self::StoppedUserExit,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Initialization => "S0",
            Self::IntentClarification => "S1",
            Self::ContextCollection => "S2",
            Self::ConstraintEvaluation => "S3",
            Self::ReadinessAssessment => "S4",
            Self::Handoff => "S5",
            Self::StoppedInformational => "stopped_informational",
            Self::StoppedInvalid => "stopped_invalid",
            Self::StoppedNotAFit => "stopped_not_a_fit",
            Self::StoppedUserExit => "stopped_user_exit",
        }
    }

    /// Position on the S0..S5 progression. Stop substates have no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Initialization => Some(0),
            Self::IntentClarification => Some(1),
            Self::ContextCollection => Some(2),
            Self::ConstraintEvaluation => Some(3),
            Self::ReadinessAssessment => Some(4),
            Self::Handoff => Some(5),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Initialization
                | Self::IntentClarification
                | Self::ContextCollection
                | Self::ConstraintEvaluation
                | Self::ReadinessAssessment
        )
    }

    pub fn is_stop(&self) -> bool {
        self.rank().is_none()
    }
}

impl fmt::Display for IntakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Input classes the transition table branches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeSignal {
    TurnReceived,
    IntentService,
    IntentInformational,
    IntentUnknown,
    ClarificationExhausted,
    ContextIncomplete,
    ContextComplete,
    ConstraintsIncomplete,
    ConstraintsClear,
    ConstraintBlocked,
    ReadinessReady,
    ReadinessMissingContext,
    ReadinessMissingConstraints,
    ReadinessNotAFit,
    ExitRequested,
}

impl IntakeSignal {
    pub const ALL: [IntakeSignal; 15] = [
        Self::TurnReceived,
        Self::IntentService,
        Self::IntentInformational,
        Self::IntentUnknown,
        Self::ClarificationExhausted,
        Self::ContextIncomplete,
        Self::ContextComplete,
        Self::ConstraintsIncomplete,
        Self::ConstraintsClear,
        Self::ConstraintBlocked,
        Self::ReadinessReady,
        Self::ReadinessMissingContext,
        Self::ReadinessMissingConstraints,
        Self::ReadinessNotAFit,
        Self::ExitRequested,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeAction {
    EmitScopeMessage,
    ClassifyIntent,
    PromptClarification,
    EmitGuidance,
    CollectContext,
    PromptMissingFields,
    EvaluateConstraints,
    AssessReadiness,
    ExplainNotAFit,
    BuildIntakeResult,
}

impl IntakeAction {
    /// Actions that let the machine keep deciding within the same turn.
    pub fn continues_turn(&self) -> bool {
        matches!(
            self,
            Self::ClassifyIntent
                | Self::CollectContext
                | Self::EvaluateConstraints
                | Self::AssessReadiness
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: IntakeState,
    pub to: IntakeState,
    pub signal: IntakeSignal,
    pub actions: Vec<IntakeAction>,
}

impl TransitionOutcome {
    pub fn continues_turn(&self) -> bool {
        self.actions.iter().any(IntakeAction::continues_turn)
    }
}
