use thiserror::Error;

use crate::flows::{FlowTransitionError, IntakeState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("session {session_id} is in terminal state {state} and cannot advance")]
    StateIntegrity { session_id: String, state: IntakeState },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// A candidate value that failed its field validator. Recorded on the turn; never fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InputValidationError {
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("value for `{field}` is empty")]
    Empty { field: String },
    #[error("value for `{field}` is too short: {value:?}")]
    TooShort { field: String, value: String },
    #[error("value for `{field}` does not describe a service: {value:?}")]
    NotDescriptive { field: String, value: String },
    #[error("`{value}` is not one of the options for `{field}`")]
    UnknownChoice { field: String, value: String },
    #[error("could not read a budget range from {value:?}")]
    UnparseableRange { field: String, value: String },
    #[error("expected yes or no for `{field}`, got {value:?}")]
    NotBoolean { field: String, value: String },
}

impl InputValidationError {
    pub fn field(&self) -> &str {
        match self {
            Self::UnknownField(field)
            | Self::Empty { field }
            | Self::TooShort { field, .. }
            | Self::NotDescriptive { field, .. }
            | Self::UnknownChoice { field, .. }
            | Self::UnparseableRange { field, .. }
            | Self::NotBoolean { field, .. } => field,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("extraction failure: {0}")]
    Extraction(String),
    #[error("session {0} already has a turn in flight")]
    SessionBusy(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::StateIntegrity { session_id, state }) => {
                Self::BadRequest {
                    message: format!("session {session_id} already closed in {state}"),
                    correlation_id: "unassigned".to_owned(),
                }
            }
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Extraction(message) | ApplicationError::SessionBusy(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
