use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowContext, IntakeAction, IntakeSignal, IntakeState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> IntakeState;
    fn transition(
        &self,
        current: &IntakeState,
        signal: &IntakeSignal,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The S0..S5 intake conversation.
#[derive(Clone, Debug, Default)]
pub struct IntakeFlow;

impl FlowDefinition for IntakeFlow {
    fn initial_state(&self) -> IntakeState {
        IntakeState::Initialization
    }

    fn transition(
        &self,
        current: &IntakeState,
        signal: &IntakeSignal,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_intake(current, signal, context)
    }
}

#[derive(Clone, Debug, Default)]
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

    pub fn initial_state(&self) -> IntakeState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &IntakeState,
        signal: &IntakeSignal,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, signal, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &IntakeState,
        signal: &IntakeSignal,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, signal, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "intake.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.code())
                    .with_metadata("to", outcome.to.code())
                    .with_metadata("signal", format!("{:?}", outcome.signal)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "intake.transition_rejected",
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

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state}: {missing_fields:?}")]
    MissingRequiredFields { state: IntakeState, missing_fields: Vec<String> },
    #[error("invalid transition from {state} using signal {signal:?}")]
    InvalidTransition { state: IntakeState, signal: IntakeSignal },
    #[error("state {state} is terminal and accepts no further signals")]
    TerminalState { state: IntakeState },
}

fn transition_intake(
    current: &IntakeState,
    signal: &IntakeSignal,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use IntakeAction::{
        AssessReadiness, BuildIntakeResult, ClassifyIntent, CollectContext, EmitGuidance,
        EmitScopeMessage, EvaluateConstraints, ExplainNotAFit, PromptClarification,
        PromptMissingFields,
    };
    use IntakeSignal::{
        ClarificationExhausted, ConstraintBlocked, ConstraintsClear, ConstraintsIncomplete,
        ContextComplete, ContextIncomplete, ExitRequested, IntentInformational, IntentService,
        IntentUnknown, ReadinessMissingConstraints, ReadinessMissingContext, ReadinessNotAFit,
        ReadinessReady, TurnReceived,
    };
    use IntakeState::{
        ConstraintEvaluation, ContextCollection, Handoff, Initialization, IntentClarification,
        ReadinessAssessment, StoppedInformational, StoppedInvalid, StoppedNotAFit,
        StoppedUserExit,
    };

    if current.is_terminal() {
        return Err(FlowTransitionError::TerminalState { state: *current });
    }

    let require_complete = || {
        if context.missing_required_fields.is_empty() {
            Ok(())
        } else {
            Err(FlowTransitionError::MissingRequiredFields {
                state: *current,
                missing_fields: context.missing_required_fields.clone(),
            })
        }
    };

    let (to, actions) = match (current, signal) {
        (_, ExitRequested) => (StoppedUserExit, vec![BuildIntakeResult]),
        (Initialization, TurnReceived) => {
            (IntentClarification, vec![EmitScopeMessage, ClassifyIntent])
        }
        (IntentClarification, IntentService) => (ContextCollection, vec![CollectContext]),
        (IntentClarification, IntentInformational) => {
            (StoppedInformational, vec![EmitGuidance, BuildIntakeResult])
        }
        (IntentClarification, IntentUnknown) => (IntentClarification, vec![PromptClarification]),
        (IntentClarification, ClarificationExhausted) => (StoppedInvalid, vec![BuildIntakeResult]),
        (ContextCollection, ContextIncomplete) => (ContextCollection, vec![PromptMissingFields]),
        (ContextCollection, ContextComplete) => {
            require_complete()?;
            (ConstraintEvaluation, vec![EvaluateConstraints])
        }
        (ConstraintEvaluation, ConstraintsIncomplete) => {
            (ConstraintEvaluation, vec![PromptMissingFields])
        }
        (ConstraintEvaluation, ConstraintsClear) => {
            require_complete()?;
            (ReadinessAssessment, vec![AssessReadiness])
        }
        (ConstraintEvaluation, ConstraintBlocked) | (ReadinessAssessment, ReadinessNotAFit) => {
            (StoppedNotAFit, vec![ExplainNotAFit, BuildIntakeResult])
        }
        (ReadinessAssessment, ReadinessReady) => {
            require_complete()?;
            (Handoff, vec![BuildIntakeResult])
        }
        (ReadinessAssessment, ReadinessMissingContext) => (ContextCollection, vec![CollectContext]),
        (ReadinessAssessment, ReadinessMissingConstraints) => {
            (ConstraintEvaluation, vec![EvaluateConstraints])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                signal: *signal,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, signal: *signal, actions })
}
