use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use intake_core::output::IntakeResult;

/// Receives every finished intake result. Delivery failures never fail the turn that produced it.
#[async_trait]
pub trait HandoffSink: Send + Sync {
    async fn deliver(&self, result: &IntakeResult) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryHandoffSink {
    results: Arc<Mutex<Vec<IntakeResult>>>,
}

impl InMemoryHandoffSink {
    pub fn results(&self) -> Vec<IntakeResult> {
        match self.results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl HandoffSink for InMemoryHandoffSink {
    async fn deliver(&self, result: &IntakeResult) -> Result<()> {
        match self.results.lock() {
            Ok(mut results) => results.push(result.clone()),
            Err(poisoned) => poisoned.into_inner().push(result.clone()),
        }
        Ok(())
    }
}

/// Writes results to the log stream as a single structured event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandoffSink;

#[async_trait]
impl HandoffSink for LoggingHandoffSink {
    async fn deliver(&self, result: &IntakeResult) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        info!(
            event_name = "intake.handoff_delivered",
            session_id = %result.session.session_id,
            request_id = %result.request_id,
            status = ?result.readiness.status,
            routing_hint = %result.handoff.routing_hint,
            payload = %payload,
            "intake result handed off"
        );
        Ok(())
    }
}
