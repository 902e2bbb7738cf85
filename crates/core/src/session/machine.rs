use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::classifier::{IntentCategory, IntentClassifier};
use crate::config::{AppConfig, ConfigError};
use crate::constraints::{ConstraintEngine, ConstraintFinding, DeterministicConstraintEngine, Severity};
use crate::errors::DomainError;
use crate::fields::{CollectionStage, FieldMap, FieldValue};
use crate::flows::{
    FlowContext, FlowEngine, IntakeAction, IntakeFlow, IntakeSignal, IntakeState,
    TransitionOutcome,
};
use crate::output::{IntakeResult, OutputBuilder};
use crate::readiness::{ReadinessEvaluator, ReadinessStatus};
use crate::registry::FieldRegistry;
use crate::session::model::{
    AcceptedField, ChannelMeta, RejectedCandidate, Session, Turn, TurnInput, TurnOutcome,
};

pub const TOOL_INTENT_CLASSIFIER: &str = "intent_classifier";
pub const TOOL_CONSTRAINT_EVALUATOR: &str = "constraint_evaluator";
pub const TOOL_READINESS_EVALUATOR: &str = "readiness_evaluator";

const MAX_CASCADE_STEPS: usize = 16;

type Audit<'a> = Option<(&'a dyn AuditSink, &'a AuditContext)>;

/// Drives sessions through S0..S5. Holds only read-only collaborators, so one engine serves
/// any number of sessions concurrently.
pub struct IntakeEngine<C = DeterministicConstraintEngine> {
    config: Arc<AppConfig>,
    registry: Arc<FieldRegistry>,
    classifier: IntentClassifier,
    constraints: C,
    readiness: ReadinessEvaluator,
    output: OutputBuilder,
    flow: FlowEngine<IntakeFlow>,
    exit_phrases: Vec<String>,
}

impl IntakeEngine<DeterministicConstraintEngine> {
    pub fn new(config: Arc<AppConfig>) -> Result<Self, ConfigError> {
        let constraints = DeterministicConstraintEngine::from_config(&config.constraints);
        Self::with_constraint_engine(config, constraints)
    }
}

impl<C> IntakeEngine<C>
where
    C: ConstraintEngine,
{
    pub fn with_constraint_engine(config: Arc<AppConfig>, constraints: C) -> Result<Self, ConfigError> {
        let registry = Arc::new(FieldRegistry::from_config(&config)?);
        let exit_phrases =
            config.engine.exit_phrases.iter().map(|phrase| normalize_phrase(phrase)).collect();
        Ok(Self {
            classifier: IntentClassifier::from_config(&config),
            readiness: ReadinessEvaluator::new(registry.clone()),
            output: OutputBuilder::new(config.clone(), registry.clone()),
            flow: FlowEngine::new(IntakeFlow),
            config,
            registry,
            constraints,
            exit_phrases,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn open_session(&self, channel: ChannelMeta, language: Option<&str>) -> Session {
        self.open_keyed_session(Uuid::new_v4().to_string(), channel, language)
    }

    /// Opens a session under a channel-supplied id with a fresh request id.
    pub fn open_keyed_session(
        &self,
        session_id: impl Into<String>,
        channel: ChannelMeta,
        language: Option<&str>,
    ) -> Session {
        self.open_session_with_ids(
            session_id,
            format!("req_{}", Uuid::new_v4().simple()),
            channel,
            language,
        )
    }

    pub fn open_session_with_ids(
        &self,
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        channel: ChannelMeta,
        language: Option<&str>,
    ) -> Session {
        let language = language
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .unwrap_or(&self.config.engine.default_language)
            .to_string();
        let session = Session::new(session_id.into(), request_id.into(), channel, language);
        info!(
            event_name = "intake.session_opened",
            session_id = %session.session_id,
            request_id = %session.request_id,
            source = %session.channel.source,
            "intake session opened"
        );
        session
    }

    /// Takes back a session restored from storage. Values the current registry no longer accepts
    /// are dropped and the awaited fields are recomputed for the state the session is in.
    pub fn resume(&self, mut session: Session) -> Result<Session, DomainError> {
        if session.is_terminal() {
            return Err(DomainError::StateIntegrity {
                session_id: session.session_id.clone(),
                state: session.state,
            });
        }

        let before = session.fields.len() + session.cached.len();
        let registry = &self.registry;
        session.fields.retain(|name, value| registry.accepts(name, value));
        session.cached.retain(|name, value| registry.accepts(name, value));
        let dropped = before - session.fields.len() - session.cached.len();

        let stage = match session.state {
            IntakeState::ContextCollection => Some(CollectionStage::Context),
            IntakeState::ConstraintEvaluation => Some(CollectionStage::Constraints),
            _ => None,
        };
        if let Some(stage) = stage {
            session.awaiting = registry.missing_names(&session.fields, Some(stage));
        }

        info!(
            event_name = "intake.session_resumed",
            session_id = %session.session_id,
            state = %session.state,
            turns = session.turns.len(),
            dropped_fields = dropped,
            "intake session resumed"
        );
        Ok(session)
    }

    /// Applies one inbound turn. The session is left untouched when an error is returned.
    pub fn advance(&self, session: &mut Session, input: TurnInput) -> Result<TurnOutcome, DomainError> {
        self.run_turn(session, input, None)
    }

    pub fn advance_with_audit(
        &self,
        session: &mut Session,
        input: TurnInput,
        sink: &dyn AuditSink,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, DomainError> {
        self.run_turn(session, input, Some((sink, audit)))
    }

    /// Moves a live session to `stopped_user_exit` without a new turn.
    pub fn abandon(&self, session: &mut Session) -> Result<IntakeResult, DomainError> {
        if session.is_terminal() {
            return Err(DomainError::StateIntegrity {
                session_id: session.session_id.clone(),
                state: session.state,
            });
        }

        let mut next = session.clone();
        let outcome = self.apply(&mut next, IntakeSignal::ExitRequested, FlowContext::default(), None)?;
        next.closing = Some(outcome);
        let result = self.finish(&mut next, None);
        *session = next;
        Ok(result)
    }

    fn run_turn(&self, session: &mut Session, input: TurnInput, audit: Audit<'_>) -> Result<TurnOutcome, DomainError> {
        if session.is_terminal() {
            return Err(DomainError::StateIntegrity {
                session_id: session.session_id.clone(),
                state: session.state,
            });
        }

        let mut next = session.clone();
        let seq = u32::try_from(next.turns.len() + 1)
            .map_err(|_| DomainError::InvariantViolation("turn sequence overflow".to_string()))?;
        let mut turn = Turn::new(seq, &input.utterance, next.state);
        let mut replies: Vec<String> = Vec::new();
        next.awaiting.clear();
        next.tool_calls.extend(input.tool_calls.iter().cloned());

        let (mut signal, mut context) = if self.is_exit(&input.utterance) {
            (IntakeSignal::ExitRequested, FlowContext::default())
        } else {
            self.absorb_candidates(&mut next, &mut turn, &input);
            if next.state == IntakeState::Initialization {
                (IntakeSignal::TurnReceived, FlowContext::default())
            } else {
                self.decide(&mut next, &mut turn, &input.utterance)
            }
        };

        let mut steps = 0;
        loop {
            steps += 1;
            if steps > MAX_CASCADE_STEPS {
                return Err(DomainError::InvariantViolation(format!(
                    "turn {seq} of session {} did not settle",
                    next.session_id
                )));
            }

            let outcome = self.apply(&mut next, signal, std::mem::take(&mut context), audit)?;
            self.promote_cached(&mut next, &mut turn);
            self.run_actions(&mut next, &outcome, &mut replies);
            let continues = outcome.continues_turn() && !outcome.to.is_terminal();
            turn.transitions.push(outcome);

            if !continues {
                break;
            }
            (signal, context) = self.decide(&mut next, &mut turn, &input.utterance);
        }

        turn.reply = replies.join("\n");
        let reply = turn.reply.clone();
        next.turns.push(turn);

        let result = next.state.is_terminal().then(|| self.finish(&mut next, audit));
        let outcome = TurnOutcome {
            state: next.state,
            reply,
            awaiting: next.awaiting.clone(),
            result,
        };
        *session = next;
        Ok(outcome)
    }

    fn apply(
        &self,
        session: &mut Session,
        signal: IntakeSignal,
        context: FlowContext,
        audit: Audit<'_>,
    ) -> Result<TransitionOutcome, DomainError> {
        let outcome = match audit {
            Some((sink, audit)) => {
                self.flow.apply_with_audit(&session.state, &signal, &context, sink, audit)
            }
            None => self.flow.apply(&session.state, &signal, &context),
        }?;

        info!(
            event_name = "intake.transition_applied",
            session_id = %session.session_id,
            from = %outcome.from,
            to = %outcome.to,
            signal = ?outcome.signal,
            "intake transition applied"
        );
        session.reach(outcome.to);
        Ok(outcome)
    }

    fn decide(&self, session: &mut Session, turn: &mut Turn, utterance: &str) -> (IntakeSignal, FlowContext) {
        match session.state {
            IntakeState::IntentClarification => {
                let classification = self.classifier.evaluate(utterance, &session.language);
                session.tool_calls.push(TOOL_INTENT_CLASSIFIER.to_string());
                session.intent = Some(classification.intent);
                turn.intent = Some(classification.clone());
                debug!(
                    event_name = "intake.intent_classified",
                    session_id = %session.session_id,
                    intent = classification.intent.as_str(),
                    rule = ?classification.rule,
                    "utterance classified"
                );

                let signal = match classification.intent {
                    IntentCategory::ServiceRequest | IntentCategory::GeneralQuestion => {
                        session.opening_request = Some(utterance.trim().to_string());
                        if classification.intent == IntentCategory::ServiceRequest {
                            IntakeSignal::IntentService
                        } else {
                            IntakeSignal::IntentInformational
                        }
                    }
                    IntentCategory::Unknown => {
                        session.clarification_attempts += 1;
                        if session.clarification_attempts >= self.config.engine.max_clarification_retries {
                            IntakeSignal::ClarificationExhausted
                        } else {
                            IntakeSignal::IntentUnknown
                        }
                    }
                };
                (signal, FlowContext::default())
            }
            IntakeState::ContextCollection => {
                let missing = self.registry.missing_names(&session.fields, Some(CollectionStage::Context));
                let signal = if missing.is_empty() {
                    IntakeSignal::ContextComplete
                } else {
                    IntakeSignal::ContextIncomplete
                };
                (signal, FlowContext { missing_required_fields: missing })
            }
            IntakeState::ConstraintEvaluation => {
                self.evaluate_constraints(session);
                let missing =
                    self.registry.missing_names(&session.fields, Some(CollectionStage::Constraints));
                let signal = if session.findings.iter().any(|finding| finding.is_blocking()) {
                    IntakeSignal::ConstraintBlocked
                } else if missing.is_empty() {
                    IntakeSignal::ConstraintsClear
                } else {
                    IntakeSignal::ConstraintsIncomplete
                };
                (signal, FlowContext { missing_required_fields: missing })
            }
            IntakeState::ReadinessAssessment => {
                self.evaluate_constraints(session);
                let verdict = self.readiness.assess(&session.fields, &session.findings);
                session.tool_calls.push(TOOL_READINESS_EVALUATOR.to_string());
                let signal = match verdict.status {
                    ReadinessStatus::Ready => IntakeSignal::ReadinessReady,
                    ReadinessStatus::NotAFit => IntakeSignal::ReadinessNotAFit,
                    ReadinessStatus::NotReady => match self.readiness.route_back(&verdict) {
                        Some(CollectionStage::Context) => IntakeSignal::ReadinessMissingContext,
                        _ => IntakeSignal::ReadinessMissingConstraints,
                    },
                };
                let context = FlowContext { missing_required_fields: verdict.missing_fields.clone() };
                session.verdict = Some(verdict);
                (signal, context)
            }
            // S0 only sees `TurnReceived`; terminal states never reach here.
            _ => (IntakeSignal::TurnReceived, FlowContext::default()),
        }
    }

    fn evaluate_constraints(&self, session: &mut Session) {
        let mut findings = self.constraints.evaluate(&session.fields);
        findings.extend(session.conflicts.iter().cloned());
        session.findings = findings;
        session.tool_calls.push(TOOL_CONSTRAINT_EVALUATOR.to_string());
    }

    fn run_actions(&self, session: &mut Session, outcome: &TransitionOutcome, replies: &mut Vec<String>) {
        let messages = &self.config.messages;
        for action in &outcome.actions {
            match action {
                IntakeAction::EmitScopeMessage => replies.push(messages.scope.clone()),
                IntakeAction::PromptClarification => replies.push(messages.clarification.clone()),
                IntakeAction::EmitGuidance => replies.push(messages.guidance.clone()),
                IntakeAction::PromptMissingFields => {
                    let stage = match outcome.to {
                        IntakeState::ConstraintEvaluation => CollectionStage::Constraints,
                        _ => CollectionStage::Context,
                    };
                    let missing: Vec<_> = self.registry.missing(&session.fields, Some(stage)).collect();
                    replies.extend(missing.iter().map(|field| field.prompt.clone()));
                    session.awaiting = missing.iter().map(|field| field.name.clone()).collect();
                }
                IntakeAction::ExplainNotAFit => {
                    let reasons = session
                        .findings
                        .iter()
                        .filter(|finding| finding.is_blocking())
                        .map(|finding| finding.note.clone());
                    replies.extend(reasons);
                }
                IntakeAction::BuildIntakeResult => {
                    let closing = match outcome.to {
                        IntakeState::Handoff => &messages.handoff,
                        IntakeState::StoppedInvalid => &messages.invalid,
                        IntakeState::StoppedUserExit => &messages.exit,
                        _ => continue,
                    };
                    replies.push(closing.clone());
                }
                IntakeAction::ClassifyIntent
                | IntakeAction::CollectContext
                | IntakeAction::EvaluateConstraints
                | IntakeAction::AssessReadiness => {}
            }
        }
    }

    fn absorb_candidates(&self, session: &mut Session, turn: &mut Turn, input: &TurnInput) {
        for (name, raw) in &input.candidates {
            match self.registry.validate(name, raw) {
                Ok(value) => {
                    let reached = self.registry.owner(name).is_some_and(|stage| stage.reached_by(session.furthest));
                    let replaced = if reached {
                        self.store(&mut session.fields, name, value.clone())
                    } else {
                        self.store(&mut session.cached, name, value.clone())
                    };
                    if let Some(previous) = &replaced {
                        debug!(
                            event_name = "intake.field_replaced",
                            session_id = %session.session_id,
                            field = %name,
                            previous = %previous,
                            "later value replaced an earlier one"
                        );
                        record_conflict(&mut session.conflicts, name, previous, &value);
                    }
                    turn.accepted.push(AcceptedField { field: name.clone(), value, cached: !reached, replaced });
                }
                Err(error) => {
                    info!(
                        event_name = "intake.candidate_rejected",
                        session_id = %session.session_id,
                        field = %error.field(),
                        reason = %error,
                        "candidate value rejected"
                    );
                    turn.rejected.push(RejectedCandidate {
                        field: error.field().to_string(),
                        raw: raw.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }
    }

    /// Latest value wins; multi-valued fields accumulate distinct entries instead.
    fn store(&self, target: &mut FieldMap, name: &str, value: FieldValue) -> Option<FieldValue> {
        let multi_valued = self.registry.get(name).is_some_and(|field| field.multi_valued);
        if multi_valued {
            if let (Some(FieldValue::List(existing)), FieldValue::List(items)) =
                (target.get_mut(name), &value)
            {
                for item in items {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
                return None;
            }
        }

        match target.insert(name.to_string(), value.clone()) {
            Some(previous) if previous != value => Some(previous),
            _ => None,
        }
    }

    fn promote_cached(&self, session: &mut Session, turn: &mut Turn) {
        let ready: Vec<String> = session
            .cached
            .keys()
            .filter(|name| self.registry.owner(name).is_some_and(|stage| stage.reached_by(session.furthest)))
            .cloned()
            .collect();

        for name in ready {
            if let Some(value) = session.cached.remove(&name) {
                debug!(
                    event_name = "intake.cached_field_promoted",
                    session_id = %session.session_id,
                    turn = turn.seq,
                    field = %name,
                    "cached field promoted"
                );
                self.store(&mut session.fields, &name, value);
            }
        }
    }

    fn finish(&self, session: &mut Session, audit: Audit<'_>) -> IntakeResult {
        if matches!(
            session.state,
            IntakeState::Handoff | IntakeState::StoppedNotAFit | IntakeState::StoppedUserExit
        ) {
            self.evaluate_constraints(session);
            session.verdict = Some(self.readiness.assess(&session.fields, &session.findings));
        }

        let result = self.output.build(session, session.verdict.as_ref(), &session.findings);
        info!(
            event_name = "intake.result_built",
            session_id = %session.session_id,
            request_id = %session.request_id,
            state = %session.state,
            status = ?result.readiness.status,
            "intake result built"
        );
        if let Some((sink, audit)) = audit {
            sink.emit(
                AuditEvent::from_context(audit, "intake.result_built", AuditCategory::Handoff, AuditOutcome::Success)
                    .with_metadata("state", session.state.code())
                    .with_metadata("routing_hint", result.handoff.routing_hint.clone()),
            );
        }
        session.result = Some(result.clone());
        result
    }

    fn is_exit(&self, utterance: &str) -> bool {
        let normalized = normalize_phrase(utterance);
        !normalized.is_empty() && self.exit_phrases.contains(&normalized)
    }
}

/// Keeps one conflict per field, describing the latest replacement.
fn record_conflict(
    conflicts: &mut Vec<ConstraintFinding>,
    name: &str,
    previous: &FieldValue,
    latest: &FieldValue,
) {
    let finding = ConstraintFinding {
        rule_id: format!("{name}_conflict"),
        severity: Severity::Inconsistency,
        note: format!("{name} changed from {previous} to {latest}; latest value kept"),
        fields: vec![name.to_string()],
    };
    match conflicts.iter_mut().find(|existing| existing.rule_id == finding.rule_id) {
        Some(existing) => *existing = finding,
        None => conflicts.push(finding),
    }
}

fn normalize_phrase(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|ch: char| ch.is_ascii_punctuation())
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::classifier::IntentCategory;
    use crate::config::AppConfig;
    use crate::constraints::Severity;
    use crate::errors::DomainError;
    use crate::fields::FieldValue;
    use crate::flows::IntakeState;
    use crate::output::{OutcomeStatus, RecommendedAction};
    use crate::session::{ChannelMeta, IntakeEngine, Session, TurnInput};

    fn engine() -> IntakeEngine {
        IntakeEngine::new(Arc::new(AppConfig::default())).expect("engine")
    }

    fn open(engine: &IntakeEngine) -> Session {
        engine.open_session_with_ids(
            "sess-test",
            "req-test",
            ChannelMeta::new("cli", "local_user", "local", Utc::now()),
            None,
        )
    }

    fn service_turn() -> TurnInput {
        TurnInput::text("I need a repair quote")
    }

    #[test]
    fn greeting_stays_in_clarification_and_asks_for_service() {
        let engine = engine();
        let mut session = open(&engine);
        let outcome = engine.advance(&mut session, TurnInput::text("hi")).expect("turn");

        assert_eq!(outcome.state, IntakeState::IntentClarification);
        assert_eq!(session.intent(), Some(IntentCategory::Unknown));
        assert!(outcome.reply.contains("What type of service"));
        assert!(outcome.result.is_none());
        assert_eq!(session.clarification_attempts(), 1);
    }

    #[test]
    fn service_request_moves_to_context_collection_and_prompts_missing() {
        let engine = engine();
        let mut session = open(&engine);
        let outcome = engine.advance(&mut session, service_turn()).expect("turn");

        assert_eq!(outcome.state, IntakeState::ContextCollection);
        assert_eq!(outcome.awaiting, vec!["urgency", "timeline", "location"]);
        assert!(outcome.reply.contains("What is your location"));
        let transitions: Vec<_> =
            session.turns()[0].transitions.iter().map(|transition| transition.to).collect();
        assert_eq!(
            transitions,
            vec![
                IntakeState::IntentClarification,
                IntakeState::ContextCollection,
                IntakeState::ContextCollection
            ]
        );
    }

    #[test]
    fn general_question_stops_informationally() {
        let engine = engine();
        let mut session = open(&engine);
        let outcome =
            engine.advance(&mut session, TurnInput::text("what is your price list")).expect("turn");

        assert_eq!(outcome.state, IntakeState::StoppedInformational);
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::Informational);
        assert!(result.readiness.missing_fields.is_empty());
        assert!(result.handoff.next_questions.is_empty());
        assert_eq!(result.request.summary, "User asked a general question: what is your price list");
    }

    #[test]
    fn free_only_budget_stops_not_a_fit() {
        let engine = engine();
        let mut session = open(&engine);
        engine
            .advance(
                &mut session,
                service_turn()
                    .with_candidate("location", "Toronto")
                    .with_candidate("urgency", "flexible")
                    .with_candidate("timeline", "within_2_weeks"),
            )
            .expect("first turn");
        assert_eq!(session.state(), IntakeState::ConstraintEvaluation);

        let outcome = engine
            .advance(&mut session, TurnInput::text("free only").with_candidate("budget_range", "free only"))
            .expect("second turn");
        assert_eq!(outcome.state, IntakeState::StoppedNotAFit);
        assert!(session.findings().iter().any(|finding| finding.rule_id == "not_a_fit_budget"));
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::NotAFit);
        assert_eq!(result.handoff.recommended_action, RecommendedAction::RejectNotAFit);
        assert!(outcome.reply.contains("minimum serviceable budget"));
    }

    #[test]
    fn complete_answers_cascade_to_handoff_in_one_turn() {
        let engine = engine();
        let mut session = open(&engine);
        let outcome = engine
            .advance(
                &mut session,
                service_turn()
                    .with_candidate("location", "Toronto")
                    .with_candidate("urgency", "urgent")
                    .with_candidate("timeline", "within_24h")
                    .with_candidate("budget_range", "$250"),
            )
            .expect("turn");

        assert_eq!(outcome.state, IntakeState::Handoff);
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::Ready);
        assert!(result.readiness.missing_fields.is_empty());
        assert_eq!(result.handoff.recommended_action, RecommendedAction::ProceedToHuman);
        assert_eq!(result.handoff.routing_hint, "human_review");
        assert_eq!(result.audit.conversation_turns, 1);
        assert!(result.audit.tool_calls.contains(&"readiness_evaluator".to_string()));
        assert_eq!(session.result(), Some(&result));
    }

    #[test]
    fn early_values_are_cached_until_their_stage() {
        let engine = engine();
        let mut session = open(&engine);
        engine
            .advance(&mut session, service_turn().with_candidate("budget_range", "100-300"))
            .expect("turn");

        assert_eq!(session.state(), IntakeState::ContextCollection);
        assert!(session.fields().get("budget_range").is_none());
        assert!(session.cached().get("budget_range").is_some());
        assert!(session.turns()[0].accepted[0].cached);

        engine
            .advance(
                &mut session,
                TurnInput::text("Toronto, flexible, next week")
                    .with_candidate("location", "Toronto")
                    .with_candidate("urgency", "flexible")
                    .with_candidate("timeline", "next week"),
            )
            .expect("turn");
        assert_eq!(session.state(), IntakeState::Handoff);
        assert!(session.cached().is_empty());
        assert!(matches!(session.fields().get("budget_range"), Some(FieldValue::Range(_))));
    }

    #[test]
    fn invalid_candidates_are_recorded_and_reprompted() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn()).expect("turn");
        let outcome = engine
            .advance(&mut session, TurnInput::text("someday").with_candidate("urgency", "someday"))
            .expect("turn");

        assert_eq!(outcome.state, IntakeState::ContextCollection);
        let turn = &session.turns()[1];
        assert_eq!(turn.rejected.len(), 1);
        assert_eq!(turn.rejected[0].field, "urgency");
        assert_eq!(turn.rejected[0].raw, "someday");
        assert!(outcome.awaiting.contains(&"urgency".to_string()));
    }

    #[test]
    fn latest_value_wins_on_conflict() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn().with_candidate("location", "Toronto")).expect("turn");
        engine.advance(&mut session, TurnInput::text("Ottawa").with_candidate("location", "Ottawa")).expect("turn");

        assert_eq!(session.fields().get("location"), Some(&FieldValue::Text("Ottawa".to_string())));
        let replaced = session.turns()[1].accepted[0].replaced.clone();
        assert_eq!(replaced, Some(FieldValue::Text("Toronto".to_string())));

        let conflicts = session.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rule_id, "location_conflict");
        assert_eq!(conflicts[0].severity, Severity::Inconsistency);
        assert_eq!(conflicts[0].fields, vec!["location"]);
        assert!(conflicts[0].note.contains("Toronto") && conflicts[0].note.contains("Ottawa"));
    }

    #[test]
    fn repeated_conflicts_keep_one_finding_per_field() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn().with_candidate("location", "Toronto")).expect("turn");
        engine.advance(&mut session, TurnInput::text("Ottawa").with_candidate("location", "Ottawa")).expect("turn");
        engine.advance(&mut session, TurnInput::text("Hamilton").with_candidate("location", "Hamilton")).expect("turn");
        engine.advance(&mut session, TurnInput::text("Hamilton").with_candidate("location", "Hamilton")).expect("turn");

        assert_eq!(session.conflicts().len(), 1);
        assert!(session.conflicts()[0].note.contains("from Ottawa to Hamilton"));
    }

    #[test]
    fn conflicts_reach_the_readiness_block() {
        let engine = engine();
        let mut session = open(&engine);
        engine
            .advance(
                &mut session,
                service_turn()
                    .with_candidate("location", "Toronto")
                    .with_candidate("urgency", "urgent")
                    .with_candidate("timeline", "within_24h"),
            )
            .expect("turn");
        let outcome = engine
            .advance(
                &mut session,
                TurnInput::text("actually Ottawa, budget 250")
                    .with_candidate("location", "Ottawa")
                    .with_candidate("budget_range", "250"),
            )
            .expect("turn");

        assert_eq!(outcome.state, IntakeState::Handoff);
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::Ready);
        let rules: Vec<_> =
            result.readiness.inconsistencies.iter().map(|finding| finding.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["location_conflict"]);
        assert!(result.readiness.notes.contains("Review 1 flagged inconsistency"));
    }

    #[test]
    fn stored_session_resumes_where_it_left_off() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn().with_candidate("location", "Toronto")).expect("turn");

        let stored = serde_json::to_string(&session).expect("serialize");
        let restored: Session = serde_json::from_str(&stored).expect("deserialize");
        assert_eq!(restored, session);

        let mut resumed = engine.resume(restored).expect("resume");
        assert_eq!(resumed.state(), IntakeState::ContextCollection);
        assert_eq!(resumed.awaiting(), ["urgency", "timeline"]);

        let outcome = engine
            .advance(
                &mut resumed,
                TurnInput::text("urgent, today, $250")
                    .with_candidate("urgency", "urgent")
                    .with_candidate("timeline", "today")
                    .with_candidate("budget_range", "$250"),
            )
            .expect("turn");
        assert_eq!(outcome.state, IntakeState::Handoff);
        assert_eq!(resumed.turns().len(), 2);
    }

    #[test]
    fn resume_drops_values_the_registry_no_longer_accepts() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn()).expect("turn");
        session.fields.insert("urgency".to_string(), FieldValue::Choice("someday".to_string()));
        session.fields.insert("retired_field".to_string(), FieldValue::Text("x".to_string()));
        session.awaiting.clear();

        let resumed = engine.resume(session).expect("resume");
        assert!(resumed.fields().get("urgency").is_none());
        assert!(resumed.fields().get("retired_field").is_none());
        assert_eq!(resumed.awaiting(), ["urgency", "timeline", "location"]);
    }

    #[test]
    fn terminal_session_cannot_be_resumed() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, TurnInput::text("what is your price list")).expect("turn");

        let error = engine.resume(session).expect_err("terminal");
        assert!(matches!(error, DomainError::StateIntegrity { ref session_id, .. } if session_id == "sess-test"));
    }

    #[test]
    fn clarification_retries_exhaust_to_invalid() {
        let engine = engine();
        let mut session = open(&engine);
        for _ in 0..2 {
            let outcome = engine.advance(&mut session, TurnInput::text("hello")).expect("turn");
            assert_eq!(outcome.state, IntakeState::IntentClarification);
        }
        let outcome = engine.advance(&mut session, TurnInput::text("hmm")).expect("turn");
        assert_eq!(outcome.state, IntakeState::StoppedInvalid);
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::Invalid);
        assert_eq!(result.handoff.routing_hint, "unclassified_review");
        assert_eq!(result.audit.conversation_turns, 3);
    }

    #[test]
    fn exit_phrase_stops_with_follow_up_questions() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn().with_candidate("location", "Toronto")).expect("turn");
        let outcome = engine.advance(&mut session, TurnInput::text("Cancel.")).expect("turn");

        assert_eq!(outcome.state, IntakeState::StoppedUserExit);
        let result = outcome.result.expect("result");
        assert_eq!(result.readiness.status, OutcomeStatus::NotReady);
        assert_eq!(result.readiness.missing_fields, vec!["urgency", "timeline", "budget_range"]);
        assert_eq!(result.handoff.recommended_action, RecommendedAction::AskFollowUp);
        assert_eq!(result.handoff.next_questions.len(), 3);
    }

    #[test]
    fn abandon_closes_a_live_session() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, service_turn()).expect("turn");
        let result = engine.abandon(&mut session).expect("abandon");

        assert_eq!(session.state(), IntakeState::StoppedUserExit);
        assert_eq!(result.session.state, IntakeState::StoppedUserExit);
        assert!(session.closing().is_some());
        assert_eq!(result.audit.conversation_turns, 1);
    }

    #[test]
    fn terminal_session_rejects_further_turns_unchanged() {
        let engine = engine();
        let mut session = open(&engine);
        engine.advance(&mut session, TurnInput::text("what is your price list")).expect("turn");
        let before = session.clone();

        let error = engine.advance(&mut session, TurnInput::text("hello again")).expect_err("terminal");
        assert!(matches!(error, DomainError::StateIntegrity { ref session_id, .. } if session_id == "sess-test"));
        assert_eq!(session, before);
        assert!(engine.abandon(&mut session).is_err());
    }

    #[test]
    fn identical_inputs_replay_identically() {
        let engine = engine();
        let script = || {
            vec![
                TurnInput::text("hey"),
                service_turn().with_candidate("location", "Toronto"),
                TurnInput::text("asap").with_candidate("urgency", "asap").with_candidate("timeline", "today"),
            ]
        };
        let run = || {
            let mut session = open(&engine);
            script()
                .into_iter()
                .map(|input| {
                    let outcome = engine.advance(&mut session, input).expect("turn");
                    (outcome.state, outcome.reply, outcome.awaiting)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn audited_turns_emit_transition_events() {
        let engine = engine();
        let mut session = open(&engine);
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new(Some("sess-test".to_string()), None, "corr-1", "test");

        engine
            .advance_with_audit(&mut session, TurnInput::text("what is your price list"), &sink, &context)
            .expect("turn");

        let kinds: Vec<_> = sink.events().into_iter().map(|event| event.event_type).collect();
        assert_eq!(
            kinds,
            vec!["intake.transition_applied", "intake.transition_applied", "intake.result_built"]
        );
    }
}
