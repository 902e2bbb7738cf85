use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use intake_core::errors::{ApplicationError, DomainError};
use intake_core::flows::IntakeState;
use intake_core::output::IntakeResult;
use intake_core::session::{ChannelMeta, IntakeEngine, Session, TurnInput};

use crate::extraction::FieldExtractor;
use crate::handoff::HandoffSink;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub session_id: String,
    pub channel: ChannelMeta,
    pub language: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeReply {
    pub session_id: String,
    pub state: IntakeState,
    pub reply: String,
    pub awaiting: Vec<String>,
    pub result: Option<IntakeResult>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session {0} already has a turn in flight")]
    SessionBusy(String),
    #[error("session {0} is not active")]
    UnknownSession(String),
    #[error("field extraction failed: {0}")]
    Extraction(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::SessionBusy(session_id) => Self::SessionBusy(session_id),
            RuntimeError::UnknownSession(session_id) => Self::Domain(DomainError::InvariantViolation(
                format!("session {session_id} is not active"),
            )),
            RuntimeError::Extraction(message) => Self::Extraction(message),
            RuntimeError::Domain(error) => Self::Domain(error),
        }
    }
}

type SessionSlot = Arc<Mutex<Session>>;

/// Hosts many independent sessions. Turns for one session never interleave; a second
/// message arriving mid-turn is rejected rather than queued.
pub struct IntakeRuntime {
    engine: Arc<IntakeEngine>,
    extractor: Arc<dyn FieldExtractor>,
    handoff: Arc<dyn HandoffSink>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl IntakeRuntime {
    pub fn new(
        engine: Arc<IntakeEngine>,
        extractor: Arc<dyn FieldExtractor>,
        handoff: Arc<dyn HandoffSink>,
    ) -> Self {
        Self { engine, extractor, handoff, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn engine(&self) -> &IntakeEngine {
        &self.engine
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn handle_message(&self, message: InboundMessage) -> Result<RuntimeReply, RuntimeError> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(message.session_id.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(self.engine.open_keyed_session(
                        message.session_id.clone(),
                        message.channel.clone(),
                        message.language.as_deref(),
                    )))
                })
                .clone()
        };

        let mut session = slot
            .try_lock()
            .map_err(|_| RuntimeError::SessionBusy(message.session_id.clone()))?;

        let candidates = self
            .extractor
            .extract(&message.text, session.awaiting())
            .await
            .map_err(|error| RuntimeError::Extraction(format!("{error:#}")))?;
        let input = TurnInput {
            utterance: message.text,
            candidates,
            tool_calls: vec![format!("field_extractor:{}", self.extractor.name())],
        };

        let outcome = self.engine.advance(&mut session, input)?;
        drop(session);

        if let Some(result) = &outcome.result {
            self.sessions.lock().await.remove(&message.session_id);
            self.deliver(result).await;
        }

        Ok(RuntimeReply {
            session_id: message.session_id,
            state: outcome.state,
            reply: outcome.reply,
            awaiting: outcome.awaiting,
            result: outcome.result,
        })
    }

    /// Closes a live session as a user exit and hands off whatever was collected.
    pub async fn abandon(&self, session_id: &str) -> Result<IntakeResult, RuntimeError> {
        let slot = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| RuntimeError::UnknownSession(session_id.to_string()))?;

        let result = {
            let mut session = slot.lock().await;
            self.engine.abandon(&mut session)?
        };
        info!(
            event_name = "intake.session_abandoned",
            session_id = %session_id,
            "intake session abandoned"
        );
        self.deliver(&result).await;
        Ok(result)
    }

    async fn deliver(&self, result: &IntakeResult) {
        if let Err(error) = self.handoff.deliver(result).await {
            warn!(
                event_name = "intake.handoff_failed",
                session_id = %result.session.session_id,
                error = %error,
                "handoff delivery failed"
            );
        }
    }
}
