use thiserror::Error;

use crate::domain::role::Role;
use crate::domain::step::StepStatus;
use crate::workflow::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid transition for step `{instance_id}`: step is already {current}")]
    InvalidTransition { instance_id: String, current: StepStatus },
    #[error("unrecognized step decision `{0}` (expected approved|rejected|skipped)")]
    UnrecognizedDecision(String),
    #[error("step instance `{0}` was not found")]
    StepInstanceNotFound(String),
    #[error("staged approval for order `{order_id}` resolved to no steps")]
    NoStepsDefined { order_id: String },
    #[error("order `{order_id}` already has approval steps")]
    StepsAlreadyInstantiated { order_id: String },
    #[error("an active approval authority already exists for role `{role}`")]
    DuplicateAuthority { role: Role },
    #[error("template `{template_name}` already has an active step {step_order}")]
    DuplicateStepOrder { template_name: String, step_order: u32 },
    #[error("role `{actor_role}` may not decide a step that requires `{required_role}`")]
    UnauthorizedActor { actor_role: Role, required_role: Role },
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateAuthority { role } => {
                Self::Domain(DomainError::DuplicateAuthority { role })
            }
            StoreError::DuplicateStepOrder { template_name, step_order } => {
                Self::Domain(DomainError::DuplicateStepOrder { template_name, step_order })
            }
            StoreError::StepsAlreadyInstantiated { order_id } => {
                Self::Domain(DomainError::StepsAlreadyInstantiated { order_id })
            }
            StoreError::NotFound(what) => {
                Self::Domain(DomainError::InvariantViolation(format!("{what} was not found")))
            }
            StoreError::Unavailable(message) | StoreError::Decode(message) => {
                Self::Persistence(message)
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
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
            Self::Conflict { .. } => {
                "The approval step was already decided. Refresh and review its current state."
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
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(
                error @ (DomainError::InvalidTransition { .. }
                | DomainError::DuplicateAuthority { .. }
                | DomainError::DuplicateStepOrder { .. }
                | DomainError::StepsAlreadyInstantiated { .. }),
            ) => Self::Conflict { message: error.to_string(), correlation_id },
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
