use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{Classification, IntentCategory};
use crate::constraints::ConstraintFinding;
use crate::fields::{FieldMap, FieldValue};
use crate::flows::{IntakeState, TransitionOutcome};
use crate::output::IntakeResult;
use crate::readiness::ReadinessVerdict;

/// Channel metadata supplied by the adapter and copied verbatim into the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub source: String,
    pub user_id: String,
    pub username: String,
    pub timestamp_utc: DateTime<Utc>,
}

impl ChannelMeta {
    pub fn new(
        source: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        timestamp_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            user_id: user_id.into(),
            username: username.into(),
            timestamp_utc,
        }
    }
}

/// One inbound message plus the candidate field values extracted from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    pub utterance: String,
    pub candidates: BTreeMap<String, String>,
    pub tool_calls: Vec<String>,
}

impl TurnInput {
    pub fn text(utterance: impl Into<String>) -> Self {
        Self { utterance: utterance.into(), ..Self::default() }
    }

    pub fn with_candidate(mut self, field: impl Into<String>, raw: impl Into<String>) -> Self {
        self.candidates.insert(field.into(), raw.into());
        self
    }

    pub fn with_tool_call(mut self, tool: impl Into<String>) -> Self {
        self.tool_calls.push(tool.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedField {
    pub field: String,
    pub value: FieldValue,
    /// Held until the owning state is reached.
    pub cached: bool,
    pub replaced: Option<FieldValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub field: String,
    pub raw: String,
    pub reason: String,
}

/// Immutable once appended to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u32,
    pub input: String,
    pub state_at_input: IntakeState,
    pub intent: Option<Classification>,
    pub accepted: Vec<AcceptedField>,
    pub rejected: Vec<RejectedCandidate>,
    pub transitions: Vec<TransitionOutcome>,
    pub reply: String,
}

impl Turn {
    pub(crate) fn new(seq: u32, input: &str, state_at_input: IntakeState) -> Self {
        Self {
            seq,
            input: input.to_string(),
            state_at_input,
            intent: None,
            accepted: Vec::new(),
            rejected: Vec::new(),
            transitions: Vec::new(),
            reply: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub state: IntakeState,
    pub reply: String,
    pub awaiting: Vec<String>,
    pub result: Option<IntakeResult>,
}

impl TurnOutcome {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Conversation state for one requester. Only [`crate::session::IntakeEngine`] mutates it.
/// Serializes in full so a caller can store it and hand it back through
/// [`crate::session::IntakeEngine::resume`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub(crate) session_id: String,
    pub(crate) request_id: String,
    pub(crate) channel: ChannelMeta,
    pub(crate) language: String,
    pub(crate) state: IntakeState,
    pub(crate) furthest: IntakeState,
    pub(crate) turns: Vec<Turn>,
    pub(crate) fields: FieldMap,
    pub(crate) cached: FieldMap,
    pub(crate) findings: Vec<ConstraintFinding>,
    /// One entry per field whose value was replaced by a different one.
    #[serde(default)]
    pub(crate) conflicts: Vec<ConstraintFinding>,
    pub(crate) verdict: Option<ReadinessVerdict>,
    pub(crate) intent: Option<IntentCategory>,
    pub(crate) clarification_attempts: u32,
    pub(crate) opening_request: Option<String>,
    pub(crate) awaiting: Vec<String>,
    pub(crate) tool_calls: Vec<String>,
    pub(crate) closing: Option<TransitionOutcome>,
    pub(crate) result: Option<IntakeResult>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        request_id: String,
        channel: ChannelMeta,
        language: String,
    ) -> Self {
        Self {
            session_id,
            request_id,
            channel,
            language,
            state: IntakeState::Initialization,
            furthest: IntakeState::Initialization,
            turns: Vec::new(),
            fields: FieldMap::new(),
            cached: FieldMap::new(),
            findings: Vec::new(),
            conflicts: Vec::new(),
            verdict: None,
            intent: None,
            clarification_attempts: 0,
            opening_request: None,
            awaiting: Vec::new(),
            tool_calls: Vec::new(),
            closing: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn channel(&self) -> &ChannelMeta {
        &self.channel
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn state(&self) -> IntakeState {
        self.state
    }

    /// Highest S0..S5 state reached so far.
    pub fn furthest(&self) -> IntakeState {
        self.furthest
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn cached(&self) -> &FieldMap {
        &self.cached
    }

    pub fn findings(&self) -> &[ConstraintFinding] {
        &self.findings
    }

    pub fn conflicts(&self) -> &[ConstraintFinding] {
        &self.conflicts
    }

    pub fn verdict(&self) -> Option<&ReadinessVerdict> {
        self.verdict.as_ref()
    }

    pub fn intent(&self) -> Option<IntentCategory> {
        self.intent
    }

    pub fn clarification_attempts(&self) -> u32 {
        self.clarification_attempts
    }

    pub fn opening_request(&self) -> Option<&str> {
        self.opening_request.as_deref()
    }

    /// Fields the last reply asked for.
    pub fn awaiting(&self) -> &[String] {
        &self.awaiting
    }

    pub fn tool_calls(&self) -> &[String] {
        &self.tool_calls
    }

    /// Transition applied outside a turn, such as abandonment.
    pub fn closing(&self) -> Option<&TransitionOutcome> {
        self.closing.as_ref()
    }

    pub fn result(&self) -> Option<&IntakeResult> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn reach(&mut self, state: IntakeState) {
        self.state = state;
        if let (Some(reached), Some(furthest)) = (state.rank(), self.furthest.rank()) {
            if reached > furthest {
                self.furthest = state;
            }
        }
    }
}
