pub mod config;
pub mod doctor;
pub mod replay;
pub mod run;

use std::sync::Arc;

use intake_core::config::{AppConfig, LoadOptions};
use intake_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;
pub const EXIT_SESSION: u8 = 4;
pub const EXIT_UNAVAILABLE: u8 = 5;
pub const EXIT_INTERNAL: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_application_error(
        command: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let (error_class, exit_code) = match &interface {
            InterfaceError::BadRequest { .. } => ("bad_request", EXIT_SESSION),
            InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", EXIT_UNAVAILABLE),
            InterfaceError::Internal { .. } => ("internal", EXIT_INTERNAL),
        };
        Self::failure(
            command,
            error_class,
            format!("{} ({interface}; correlation_id={correlation_id})", interface.user_message()),
            exit_code,
        )
    }
}

/// Loads configuration for a command, mapping failures to the `config_validation` class.
pub fn load_config(command: &str, options: &LoadOptions) -> Result<Arc<AppConfig>, CommandResult> {
    AppConfig::load(options.clone()).map(Arc::new).map_err(|error| {
        CommandResult::failure(command, "config_validation", error.to_string(), EXIT_CONFIG)
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

fn to_pretty_json(command: &str, value: &impl Serialize) -> CommandResult {
    match serde_json::to_string_pretty(value) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(command, "serialization", error.to_string(), EXIT_INTERNAL),
    }
}
