use serde::Serialize;
use thiserror::Error;

use crate::domain::token::TokenRejection;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("token rejected: {0}")]
    TokenInvalid(#[from] TokenRejection),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Caller-visible classification of a failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidState,
    TokenInvalid,
    Validation,
    Unauthorized,
    Unavailable,
    Internal,
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidState(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Domain(DomainError::Validation(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(DomainError::FlowTransition(_))
            | Self::Domain(DomainError::InvalidState(_)) => ErrorKind::InvalidState,
            Self::Domain(DomainError::Validation(_)) => ErrorKind::Validation,
            Self::Domain(DomainError::InvariantViolation(_)) => ErrorKind::Internal,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::TokenInvalid(_) => ErrorKind::TokenInvalid,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Persistence(_) | Self::Integration(_) => ErrorKind::Unavailable,
            Self::Configuration(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("gone: {message}")]
    Gone { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
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
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The record is not in a state that allows this operation.",
            Self::Gone { .. } => "This link is invalid or has expired.",
            Self::Forbidden { .. } => "You are not allowed to perform this operation.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Gone { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Gone { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value.kind() {
            ErrorKind::Validation => Self::BadRequest { message: value.to_string(), correlation_id },
            ErrorKind::NotFound => Self::NotFound { message: value.to_string(), correlation_id },
            ErrorKind::AlreadyExists | ErrorKind::InvalidState => {
                Self::Conflict { message: value.to_string(), correlation_id }
            }
            // The reason stays internal; every token failure looks the same from outside.
            ErrorKind::TokenInvalid => {
                Self::Gone { message: "approval link is not valid".to_owned(), correlation_id }
            }
            ErrorKind::Unauthorized => Self::Forbidden { message: value.to_string(), correlation_id },
            ErrorKind::Unavailable => {
                Self::ServiceUnavailable { message: value.to_string(), correlation_id }
            }
            ErrorKind::Internal => Self::Internal { message: value.to_string(), correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::token::TokenRejection;
    use crate::errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
    use crate::flows::{FlowTransitionError, WorkOrderEvent, WorkOrderStatusMachine};
    use crate::flows::Lifecycle;
    use crate::domain::work_order::WorkOrderStatus;

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::Validation(
            "missing required field".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn flow_transition_is_an_invalid_state() {
        let error: FlowTransitionError = WorkOrderStatusMachine
            .transition(&WorkOrderStatus::Pending, &WorkOrderEvent::Finish)
            .expect_err("pending orders cannot finish");
        let application = ApplicationError::from(DomainError::from(error));

        assert_eq!(application.kind(), ErrorKind::InvalidState);
        assert!(matches!(application.into_interface("req-2"), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn token_rejections_hide_their_reason() {
        for rejection in [TokenRejection::NotFound, TokenRejection::AlreadyUsed, TokenRejection::Expired]
        {
            let interface = ApplicationError::from(rejection).into_interface("req-3");
            match interface {
                InterfaceError::Gone { ref message, .. } => {
                    assert_eq!(message, "approval link is not valid");
                }
                other => panic!("unexpected mapping: {other:?}"),
            }
        }
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-4");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing smtp host".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
