// ABOUTME: Error types for workspace orchestration
// ABOUTME: Separates substrate call failures from the provision/cleanup taxonomy exposed to callers

use thiserror::Error;

/// Failure reported by a substrate client call.
///
/// This is the vocabulary the adapters reason about: `NotFound` and
/// `NotModified` are frequently tolerated, everything else is propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    /// The addressed object does not exist (HTTP 404)
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The request was a no-op, e.g. stopping a stopped container (HTTP 304)
    #[error("Object not modified: {0}")]
    NotModified(String),

    /// Transport, socket or authentication failure talking to the substrate API
    #[error("Substrate unreachable: {0}")]
    Unavailable(String),

    /// The substrate answered with an error status
    #[error("Substrate rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The substrate answered with a payload we could not interpret
    #[error("Invalid substrate response: {0}")]
    Invalid(String),
}

impl SubstrateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SubstrateError::NotFound(_))
    }
}

impl From<bollard::errors::Error> for SubstrateError {
    fn from(error: bollard::errors::Error) -> Self {
        use bollard::errors::Error as BollardError;

        match error {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => SubstrateError::NotFound(message),
            BollardError::DockerResponseServerError {
                status_code: 304,
                message,
            } => SubstrateError::NotModified(message),
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => SubstrateError::Rejected {
                status: status_code,
                message,
            },
            BollardError::JsonDataError { message, .. } => SubstrateError::Invalid(message),
            BollardError::JsonSerdeError { err } => SubstrateError::Invalid(err.to_string()),
            other => SubstrateError::Unavailable(other.to_string()),
        }
    }
}

impl From<kube::Error> for SubstrateError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => {
                SubstrateError::NotFound(response.message)
            }
            kube::Error::Api(response) => SubstrateError::Rejected {
                status: response.code,
                message: response.message,
            },
            kube::Error::SerdeError(e) => SubstrateError::Invalid(e.to_string()),
            other => SubstrateError::Unavailable(other.to_string()),
        }
    }
}

/// Main error type for workspace operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    /// Creation failed; any partially created objects were removed
    #[error("Failed to provision workspace {session_id}: {reason}")]
    Provision { session_id: String, reason: String },

    /// Teardown failed, either while reaping a failed creation or during delete.
    /// Objects may be left behind; retrying delete is safe.
    #[error("Failed to clean up workspace {session_id}: {reason}")]
    Cleanup {
        session_id: String,
        reason: String,
        provision_failure: Option<String>,
    },

    /// Transport or auth failure talking to the substrate API
    #[error("Substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    /// Any other substrate error response
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// A substrate call exceeded its deadline
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl WorkspaceError {
    pub fn provision(session_id: &str, reason: impl ToString) -> Self {
        WorkspaceError::Provision {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn cleanup(session_id: &str, reason: impl ToString) -> Self {
        WorkspaceError::Cleanup {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
            provision_failure: None,
        }
    }
}

impl From<SubstrateError> for WorkspaceError {
    fn from(error: SubstrateError) -> Self {
        match error {
            SubstrateError::Unavailable(message) => WorkspaceError::SubstrateUnavailable(message),
            other => WorkspaceError::Substrate(other.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for WorkspaceError {
    fn from(error: crate::config::ConfigError) -> Self {
        WorkspaceError::InvalidConfiguration(error.to_string())
    }
}

/// Type alias for Results that return WorkspaceError
pub type Result<T> = std::result::Result<T, WorkspaceError>;
