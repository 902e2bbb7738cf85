//! The `intake_result` document handed to downstream systems.
//!
//! Every block is always present. Unset scalar details render as `not_provided` and arrays are
//! empty rather than absent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::IntentCategory;
use crate::config::AppConfig;
use crate::constraints::ConstraintFinding;
use crate::fields::{
    FieldValue, BUDGET_RANGE, CONSTRAINTS, LOCATION, NOT_PROVIDED, SCOPE, TIMELINE, URGENCY,
};
use crate::flows::IntakeState;
use crate::readiness::{ReadinessStatus, ReadinessVerdict};
use crate::registry::FieldRegistry;
use crate::session::{ChannelMeta, Session};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntakeResult {
    pub schema_version: String,
    pub request_id: String,
    pub channel: ChannelMeta,
    pub session: SessionBlock,
    pub request: RequestBlock,
    pub readiness: ReadinessBlock,
    pub handoff: HandoffBlock,
    pub audit: AuditBlock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub session_id: String,
    pub language: String,
    pub state: IntakeState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestBlock {
    pub request_type: String,
    pub service_category: String,
    pub summary: String,
    pub details: RequestDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub urgency: String,
    pub timeline: String,
    pub location: String,
    pub budget_range: String,
    pub constraints: Vec<String>,
    pub extra_fields: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ready,
    NotReady,
    NotAFit,
    Informational,
    Invalid,
}

impl From<ReadinessStatus> for OutcomeStatus {
    fn from(value: ReadinessStatus) -> Self {
        match value {
            ReadinessStatus::Ready => Self::Ready,
            ReadinessStatus::NotReady => Self::NotReady,
            ReadinessStatus::NotAFit => Self::NotAFit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessBlock {
    pub status: OutcomeStatus,
    pub missing_fields: Vec<String>,
    pub inconsistencies: Vec<ConstraintFinding>,
    pub notes: String,
}

impl ReadinessBlock {
    /// The evaluator verdict this block was rendered from. Stops that never reached
    /// readiness (informational, invalid) carry none.
    pub fn verdict(&self) -> Option<ReadinessVerdict> {
        let status = match self.status {
            OutcomeStatus::Ready => ReadinessStatus::Ready,
            OutcomeStatus::NotReady => ReadinessStatus::NotReady,
            OutcomeStatus::NotAFit => ReadinessStatus::NotAFit,
            OutcomeStatus::Informational | OutcomeStatus::Invalid => return None,
        };
        Some(ReadinessVerdict {
            status,
            missing_fields: self.missing_fields.clone(),
            inconsistencies: self.inconsistencies.clone(),
            notes: self.notes.clone(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ProceedToHuman,
    AskFollowUp,
    InformAndStop,
    RejectNotAFit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffBlock {
    pub recommended_action: RecommendedAction,
    pub next_questions: Vec<String>,
    pub routing_hint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBlock {
    pub conversation_turns: usize,
    pub tool_calls: Vec<String>,
    /// When this document was built, not when the session opened.
    pub created_at_utc: DateTime<Utc>,
}

impl IntakeResult {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Clone, Debug)]
pub struct OutputBuilder {
    config: Arc<AppConfig>,
    registry: Arc<FieldRegistry>,
}

impl OutputBuilder {
    pub fn new(config: Arc<AppConfig>, registry: Arc<FieldRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn build(
        &self,
        session: &Session,
        verdict: Option<&ReadinessVerdict>,
        findings: &[ConstraintFinding],
    ) -> IntakeResult {
        let state = session.state();
        let readiness = self.readiness_block(state, verdict, findings);
        let handoff = self.handoff_block(state, &readiness);

        IntakeResult {
            schema_version: self.config.engine.schema_version.clone(),
            request_id: session.request_id().to_string(),
            channel: session.channel().clone(),
            session: SessionBlock {
                session_id: session.session_id().to_string(),
                language: session.language().to_string(),
                state,
            },
            request: self.request_block(session),
            readiness,
            handoff,
            audit: AuditBlock {
                conversation_turns: session.turns().len(),
                tool_calls: session.tool_calls().to_vec(),
                created_at_utc: Utc::now(),
            },
        }
    }

    fn readiness_block(
        &self,
        state: IntakeState,
        verdict: Option<&ReadinessVerdict>,
        findings: &[ConstraintFinding],
    ) -> ReadinessBlock {
        match state {
            IntakeState::StoppedInformational => ReadinessBlock {
                status: OutcomeStatus::Informational,
                missing_fields: Vec::new(),
                inconsistencies: Vec::new(),
                notes: "Informational request (not an intake).".to_string(),
            },
            IntakeState::StoppedInvalid => ReadinessBlock {
                status: OutcomeStatus::Invalid,
                missing_fields: Vec::new(),
                inconsistencies: Vec::new(),
                notes: format!(
                    "No service request identified after {} clarification attempts.",
                    self.config.engine.max_clarification_retries
                ),
            },
            _ => match verdict {
                Some(verdict) => ReadinessBlock {
                    status: verdict.status.into(),
                    missing_fields: verdict.missing_fields.clone(),
                    inconsistencies: verdict.inconsistencies.clone(),
                    notes: verdict.notes.clone(),
                },
                None => ReadinessBlock {
                    status: OutcomeStatus::NotReady,
                    missing_fields: Vec::new(),
                    inconsistencies: findings.to_vec(),
                    notes: "More information is required to proceed.".to_string(),
                },
            },
        }
    }

    fn handoff_block(&self, state: IntakeState, readiness: &ReadinessBlock) -> HandoffBlock {
        let routing = &self.config.routing;
        let (recommended_action, routing_hint) = match readiness.status {
            OutcomeStatus::Ready => (RecommendedAction::ProceedToHuman, &routing.ready),
            OutcomeStatus::NotReady => (RecommendedAction::AskFollowUp, &routing.not_ready),
            OutcomeStatus::NotAFit => (RecommendedAction::RejectNotAFit, &routing.not_a_fit),
            OutcomeStatus::Informational => {
                (RecommendedAction::InformAndStop, &routing.informational)
            }
            OutcomeStatus::Invalid => (RecommendedAction::ProceedToHuman, &routing.invalid),
        };

        let next_questions = match (state, readiness.status) {
            (IntakeState::StoppedInvalid, _) => vec![self.config.messages.clarification.clone()],
            (_, OutcomeStatus::NotReady) => readiness
                .missing_fields
                .iter()
                .map(|field| self.registry.prompt_for(field))
                .collect(),
            _ => Vec::new(),
        };

        HandoffBlock { recommended_action, next_questions, routing_hint: routing_hint.clone() }
    }

    fn request_block(&self, session: &Session) -> RequestBlock {
        let fields = session.fields();
        let scalar = |name: &str| {
            fields
                .get(name)
                .map(FieldValue::display)
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| NOT_PROVIDED.to_string())
        };

        let constraints = match fields.get(CONSTRAINTS) {
            Some(FieldValue::List(items)) => items.clone(),
            Some(other) => vec![other.display()],
            None => Vec::new(),
        };

        let fixed = [URGENCY, TIMELINE, LOCATION, BUDGET_RANGE, CONSTRAINTS];
        let extra_fields = self
            .registry
            .fields()
            .iter()
            .filter(|field| !fixed.contains(&field.name.as_str()))
            .filter_map(|field| {
                fields.get(&field.name).map(|value| (field.name.clone(), json_value(value)))
            })
            .collect();

        let (request_type, service_category, summary) = match session.intent() {
            Some(IntentCategory::GeneralQuestion) => (
                IntentCategory::GeneralQuestion,
                "informational".to_string(),
                format!("User asked a general question: {}", session.opening_request().unwrap_or_default()),
            ),
            Some(IntentCategory::ServiceRequest) => {
                let described = fields
                    .get(SCOPE)
                    .map(FieldValue::display)
                    .or_else(|| session.opening_request().map(ToString::to_string));
                let summary = match described {
                    Some(described) => format!("User is requesting: {described}"),
                    None => "Service request".to_string(),
                };
                (IntentCategory::ServiceRequest, self.config.engine.service_category.clone(), summary)
            }
            Some(IntentCategory::Unknown) | None => (
                IntentCategory::Unknown,
                self.config.engine.service_category.clone(),
                "Request could not be classified.".to_string(),
            ),
        };

        RequestBlock {
            request_type: request_type.as_str().to_string(),
            service_category,
            summary,
            details: RequestDetails {
                urgency: scalar(URGENCY),
                timeline: scalar(TIMELINE),
                location: scalar(LOCATION),
                budget_range: scalar(BUDGET_RANGE),
                constraints,
                extra_fields,
            },
        }
    }
}

fn json_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(text) | FieldValue::Choice(text) => Value::String(text.clone()),
        FieldValue::Range(range) => Value::String(range.label.clone()),
        FieldValue::Flag(flag) => Value::Bool(*flag),
        FieldValue::List(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::config::AppConfig;
    use crate::output::{OutcomeStatus, RecommendedAction};
    use crate::session::{ChannelMeta, IntakeEngine, TurnInput};

    fn engine() -> IntakeEngine {
        IntakeEngine::new(Arc::new(AppConfig::default())).expect("engine")
    }

    fn channel() -> ChannelMeta {
        ChannelMeta::new(
            "web_chat",
            "user-9",
            "Dana",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().expect("timestamp"),
        )
    }

    #[test]
    fn informational_stop_renders_full_shape_with_empty_arrays() {
        let engine = engine();
        let mut session = engine.open_session(channel(), None);
        let outcome =
            engine.advance(&mut session, TurnInput::text("what is your price list")).expect("turn");
        let result = outcome.result.expect("terminal result");

        assert_eq!(result.readiness.status, OutcomeStatus::Informational);
        assert_eq!(result.handoff.recommended_action, RecommendedAction::InformAndStop);
        assert_eq!(result.handoff.routing_hint, "informational");
        assert_eq!(result.request.request_type, "general_question");

        let json = serde_json::to_value(&result).expect("serializes");
        for key in ["schema_version", "request_id", "channel", "session", "request", "readiness", "handoff", "audit"] {
            assert!(json.get(key).is_some(), "missing top-level key {key}");
        }
        assert_eq!(json["readiness"]["missing_fields"], serde_json::json!([]));
        assert_eq!(json["readiness"]["inconsistencies"], serde_json::json!([]));
        assert_eq!(json["handoff"]["next_questions"], serde_json::json!([]));
        assert_eq!(json["request"]["details"]["constraints"], serde_json::json!([]));
        assert_eq!(json["request"]["details"]["extra_fields"], serde_json::json!({}));
        assert_eq!(json["request"]["details"]["location"], "not_provided");
        assert_eq!(json["session"]["state"], "stopped_informational");
        assert_eq!(json["channel"]["username"], "Dana");
        assert_eq!(json["audit"]["conversation_turns"], 1);
    }

    #[test]
    fn result_timestamp_is_taken_when_the_result_is_built() {
        let engine = engine();
        let mut session = engine.open_session(channel(), None);
        engine.advance(&mut session, TurnInput::text("I need a repair quote")).expect("turn");
        let before = Utc::now();
        let result = engine.abandon(&mut session).expect("abandon");

        assert!(result.audit.created_at_utc >= before);
        assert!(result.audit.created_at_utc >= session.created_at());
    }

    #[test]
    fn readiness_block_round_trips_to_the_verdict() {
        let engine = engine();
        let mut session = engine.open_session(channel(), Some("en"));
        engine
            .advance(
                &mut session,
                TurnInput::text("I need a repair quote")
                    .with_candidate("location", "Toronto")
                    .with_candidate("urgency", "flexible")
                    .with_candidate("timeline", "within_1_week"),
            )
            .expect("first turn");
        let outcome = engine
            .advance(&mut session, TurnInput::text("free only").with_candidate("budget_range", "free only"))
            .expect("second turn");

        let result = outcome.result.expect("terminal result");
        let verdict = session.verdict().cloned().expect("verdict recorded");
        assert_eq!(result.readiness.verdict(), Some(verdict));
        assert_eq!(result.handoff.recommended_action, RecommendedAction::RejectNotAFit);
        assert_eq!(result.handoff.routing_hint, "not_a_fit_review");
    }

    #[test]
    fn availability_and_scope_surface_as_extra_fields() {
        let engine = engine();
        let mut session = engine.open_session(channel(), None);
        let outcome = engine
            .advance(
                &mut session,
                TurnInput::text("Please fix my dishwasher")
                    .with_candidate("scope", "dishwasher repair")
                    .with_candidate("location", "Ottawa")
                    .with_candidate("urgency", "urgent")
                    .with_candidate("timeline", "today")
                    .with_candidate("availability", "weekends")
                    .with_candidate("budget_range", "100-300")
                    .with_candidate("constraints", "street parking only"),
            )
            .expect("turn");

        let result = outcome.result.expect("ready result");
        let details = &result.request.details;
        assert_eq!(result.readiness.status, OutcomeStatus::Ready);
        assert_eq!(details.timeline, "within_24h");
        assert_eq!(details.budget_range, "100-300");
        assert_eq!(details.constraints, vec!["street parking only"]);
        assert_eq!(details.extra_fields.get("availability"), Some(&serde_json::json!("weekends")));
        assert_eq!(details.extra_fields.get("scope"), Some(&serde_json::json!("dishwasher repair")));
        assert_eq!(result.request.summary, "User is requesting: dishwasher repair");
        assert_eq!(result.request.service_category, "general_services");
    }
}
