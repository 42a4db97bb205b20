use crate::constraint::ConstraintError;
use crate::fetch::FetchError;
use crate::json_pointer::PointerError;
use crate::path::PathError;
use crate::selector::SelectorError;
use crate::specification::SpecificationError;
use crate::time_series::QueryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine codes for [`SessionError`].
pub mod code {
    pub const NO_SUCH_TOPIC: &str = "STRATA_NO_SUCH_TOPIC";
    pub const INCOMPATIBLE_TOPIC: &str = "STRATA_INCOMPATIBLE_TOPIC";
    pub const INCOMPATIBLE_EXISTING_TOPIC: &str = "STRATA_INCOMPATIBLE_EXISTING_TOPIC";
    pub const INCOMPATIBLE_TOPIC_STATE: &str = "STRATA_INCOMPATIBLE_TOPIC_STATE";
    pub const UNSATISFIED_CONSTRAINT: &str = "STRATA_UNSATISFIED_CONSTRAINT";
    pub const INVALID_UPDATE_STREAM: &str = "STRATA_INVALID_UPDATE_STREAM";
    pub const INVALID_TOPIC_PATH: &str = "STRATA_INVALID_TOPIC_PATH";
    pub const INVALID_TOPIC_SPECIFICATION: &str = "STRATA_INVALID_TOPIC_SPECIFICATION";
    pub const TOPIC_LICENSE_LIMIT: &str = "STRATA_TOPIC_LICENSE_LIMIT";
    pub const CLUSTER_REPARTITION: &str = "STRATA_CLUSTER_REPARTITION";
    pub const SESSION_SECURITY: &str = "STRATA_SESSION_SECURITY";
    pub const SESSION_CLOSED: &str = "STRATA_SESSION_CLOSED";
    pub const MISQUOTED_INPUT: &str = "STRATA_MISQUOTED_INPUT";
    pub const UNRECOGNIZED_RESPONSE_CODE: &str = "STRATA_UNRECOGNIZED_RESPONSE_CODE";
    pub const INVALID_ARGUMENT: &str = "STRATA_INVALID_ARGUMENT";
    pub const INVALID_SELECTOR: &str = "STRATA_INVALID_SELECTOR";
    pub const INVALID_CONSTRAINT: &str = "STRATA_INVALID_CONSTRAINT";
    pub const INCOMPATIBLE_VALUE: &str = "STRATA_INCOMPATIBLE_VALUE";
    pub const NO_SUCH_EVENT: &str = "STRATA_NO_SUCH_EVENT";
    pub const NO_SUCH_SESSION: &str = "STRATA_NO_SUCH_SESSION";
    pub const NO_HANDLER: &str = "STRATA_NO_HANDLER";
    pub const REQUEST_REJECTED: &str = "STRATA_REQUEST_REJECTED";
    pub const REGISTRATION_CLOSED: &str = "STRATA_REGISTRATION_CLOSED";
    pub const DISCONNECTED: &str = "STRATA_DISCONNECTED";
    pub const CANCELLED: &str = "STRATA_CANCELLED";
    pub const INTERNAL: &str = "STRATA_INTERNAL";
}

/// Every failure an operation can complete with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no such topic: {path}")]
    NoSuchTopic { path: String },

    #[error("topic {path} is incompatible with the operation: {reason}")]
    IncompatibleTopic { path: String, reason: String },

    #[error("topic {path} already exists with a different specification")]
    IncompatibleExistingTopic { path: String },

    #[error("topic {path} cannot be updated in its current state")]
    IncompatibleTopicState { path: String },

    #[error("update constraint not satisfied for {path}")]
    UnsatisfiedConstraint { path: String },

    #[error("update stream is no longer valid")]
    InvalidUpdateStream,

    #[error("invalid topic path: {message}")]
    InvalidTopicPath { message: String },

    #[error("invalid topic specification: {message}")]
    InvalidTopicSpecification { message: String },

    #[error("topic limit of {limit} reached")]
    TopicLicenseLimit { limit: usize },

    #[error("cluster repartition in progress")]
    ClusterRepartition,

    #[error("permission {permission} denied for {path}")]
    SessionSecurity { permission: String, path: String },

    #[error("session closed")]
    SessionClosed,

    #[error("misquoted input at offset {position}: {input}")]
    MisquotedInput { input: String, position: usize },

    #[error("unrecognized response code {code}")]
    UnrecognizedResponseCode { code: u32 },

    #[error("invalid argument {field}: {message}")]
    InvalidArgument { field: String, message: String },

    #[error("invalid selector: {message}")]
    InvalidSelector { message: String },

    #[error("invalid constraint: {message}")]
    InvalidConstraint { message: String },

    #[error("value cannot be read as {expected}")]
    IncompatibleValue { expected: String },

    #[error("no event with sequence {sequence} in {path}")]
    NoSuchEvent { path: String, sequence: u64 },

    #[error("no such session: {session_id}")]
    NoSuchSession { session_id: String },

    #[error("no request handler for {path}")]
    NoHandler { path: String },

    #[error("request rejected: {reason}")]
    RequestRejected { reason: String },

    #[error("request handler registration closed")]
    RegistrationClosed,

    #[error("connection to server lost")]
    Disconnected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchTopic { .. } => code::NO_SUCH_TOPIC,
            Self::IncompatibleTopic { .. } => code::INCOMPATIBLE_TOPIC,
            Self::IncompatibleExistingTopic { .. } => code::INCOMPATIBLE_EXISTING_TOPIC,
            Self::IncompatibleTopicState { .. } => code::INCOMPATIBLE_TOPIC_STATE,
            Self::UnsatisfiedConstraint { .. } => code::UNSATISFIED_CONSTRAINT,
            Self::InvalidUpdateStream => code::INVALID_UPDATE_STREAM,
            Self::InvalidTopicPath { .. } => code::INVALID_TOPIC_PATH,
            Self::InvalidTopicSpecification { .. } => code::INVALID_TOPIC_SPECIFICATION,
            Self::TopicLicenseLimit { .. } => code::TOPIC_LICENSE_LIMIT,
            Self::ClusterRepartition => code::CLUSTER_REPARTITION,
            Self::SessionSecurity { .. } => code::SESSION_SECURITY,
            Self::SessionClosed => code::SESSION_CLOSED,
            Self::MisquotedInput { .. } => code::MISQUOTED_INPUT,
            Self::UnrecognizedResponseCode { .. } => code::UNRECOGNIZED_RESPONSE_CODE,
            Self::InvalidArgument { .. } => code::INVALID_ARGUMENT,
            Self::InvalidSelector { .. } => code::INVALID_SELECTOR,
            Self::InvalidConstraint { .. } => code::INVALID_CONSTRAINT,
            Self::IncompatibleValue { .. } => code::INCOMPATIBLE_VALUE,
            Self::NoSuchEvent { .. } => code::NO_SUCH_EVENT,
            Self::NoSuchSession { .. } => code::NO_SUCH_SESSION,
            Self::NoHandler { .. } => code::NO_HANDLER,
            Self::RequestRejected { .. } => code::REQUEST_REJECTED,
            Self::RegistrationClosed => code::REGISTRATION_CLOSED,
            Self::Disconnected => code::DISCONNECTED,
            Self::Cancelled => code::CANCELLED,
            Self::Internal { .. } => code::INTERNAL,
        }
    }

    /// Whether the same operation may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ClusterRepartition | Self::Disconnected)
    }

    // ── Convenience constructors ─────────────────────────────────────

    pub fn no_such_topic(path: impl ToString) -> Self {
        Self::NoSuchTopic { path: path.to_string() }
    }

    pub fn incompatible_topic(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::IncompatibleTopic { path: path.to_string(), reason: reason.into() }
    }

    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument { field: field.into(), message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

// ── Conversions from local errors ────────────────────────────────────

impl From<PathError> for SessionError {
    fn from(value: PathError) -> Self {
        Self::InvalidTopicPath { message: value.to_string() }
    }
}

impl From<SelectorError> for SessionError {
    fn from(value: SelectorError) -> Self {
        Self::InvalidSelector { message: value.to_string() }
    }
}

impl From<SpecificationError> for SessionError {
    fn from(value: SpecificationError) -> Self {
        Self::InvalidTopicSpecification { message: value.to_string() }
    }
}

impl From<PointerError> for SessionError {
    fn from(value: PointerError) -> Self {
        Self::InvalidConstraint { message: value.to_string() }
    }
}

impl From<ConstraintError> for SessionError {
    fn from(value: ConstraintError) -> Self {
        Self::InvalidConstraint { message: value.to_string() }
    }
}

impl From<QueryError> for SessionError {
    fn from(value: QueryError) -> Self {
        match value {
            QueryError::ArgumentTooLarge { name, .. } | QueryError::NegativeInterval { name } => {
                Self::invalid_argument(name, value.to_string())
            }
            QueryError::WrongQueryKind { operation } => Self::invalid_argument(operation, value.to_string()),
            QueryError::NoSuchEvent { sequence } => Self::NoSuchEvent { path: String::new(), sequence },
        }
    }
}

impl From<FetchError> for SessionError {
    fn from(value: FetchError) -> Self {
        match &value {
            FetchError::ArgumentTooLarge { name, .. } => Self::invalid_argument(*name, value.to_string()),
            FetchError::IncompatibleTopicTypes { .. } | FetchError::EmptyTopicTypes => {
                Self::invalid_argument("topic_types", value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SessionError::SessionClosed.code(), "STRATA_SESSION_CLOSED");
        assert_eq!(SessionError::InvalidUpdateStream.code(), code::INVALID_UPDATE_STREAM);
        assert_eq!(SessionError::no_such_topic("a").code(), code::NO_SUCH_TOPIC);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(SessionError::ClusterRepartition.is_retryable());
        assert!(SessionError::Disconnected.is_retryable());
        assert!(!SessionError::SessionClosed.is_retryable());
        assert!(!SessionError::UnsatisfiedConstraint { path: "a".into() }.is_retryable());
    }

    #[test]
    fn local_errors_convert() {
        let err: SessionError = PathError::Empty.into();
        assert_eq!(err.code(), code::INVALID_TOPIC_PATH);

        let err: SessionError = SelectorError::Empty.into();
        assert_eq!(err.code(), code::INVALID_SELECTOR);

        let err: SessionError = ConstraintError::ConflictingValues.into();
        assert_eq!(err.code(), code::INVALID_CONSTRAINT);

        let err: SessionError = FetchError::ArgumentTooLarge { name: "first", value: u64::MAX }.into();
        assert!(matches!(err, SessionError::InvalidArgument { ref field, .. } if field == "first"));
    }

    #[test]
    fn serializes_with_variant_name() {
        let json = serde_json::to_string(&SessionError::ClusterRepartition).expect("serialize");
        assert_eq!(json, "\"ClusterRepartition\"");
        let back: SessionError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, SessionError::ClusterRepartition);
    }
}
