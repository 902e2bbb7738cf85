//! Agent runtime for the intake engine.
//!
//! Sits between chat channels and [`intake_core::session::IntakeEngine`]:
//! - `extraction` turns free text into candidate field values
//! - `runtime` hosts concurrent sessions and serializes turns per session
//! - `handoff` receives finished intake results
//!
//! Extractors only propose values. Acceptance, state transitions and readiness are
//! decided by the deterministic core.

pub mod extraction;
pub mod handoff;
pub mod runtime;

pub use extraction::{FieldExtractor, RuleExtractor};
pub use handoff::{HandoffSink, InMemoryHandoffSink, LoggingHandoffSink};
pub use runtime::{InboundMessage, IntakeRuntime, RuntimeError, RuntimeReply};
