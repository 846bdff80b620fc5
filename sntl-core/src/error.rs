//! Control-plane error codes and the crate error type

use std::fmt;
use thiserror::Error;

/// Error codes reported by the control plane and the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // IAM
    EntityAlreadyExists,
    NoSuchEntity,
    LimitExceeded,
    MalformedPolicyDocument,
    DeleteConflict,

    // Lambda
    ResourceConflict,
    ResourceNotFound,
    InvalidParameterValue,
    TooManyRequests,

    // ECR / container registry
    RepositoryNotFound,
    ImageNotFound,
    Unauthorized,

    // Common
    AccessDenied,
    ExpiredToken,
    Validation,
    ServiceFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityAlreadyExists => "EntityAlreadyExists",
            Self::NoSuchEntity => "NoSuchEntity",
            Self::LimitExceeded => "LimitExceeded",
            Self::MalformedPolicyDocument => "MalformedPolicyDocument",
            Self::DeleteConflict => "DeleteConflict",
            Self::ResourceConflict => "ResourceConflictException",
            Self::ResourceNotFound => "ResourceNotFoundException",
            Self::InvalidParameterValue => "InvalidParameterValueException",
            Self::TooManyRequests => "TooManyRequestsException",
            Self::RepositoryNotFound => "RepositoryNotFoundException",
            Self::ImageNotFound => "ImageNotFoundException",
            Self::Unauthorized => "Unauthorized",
            Self::AccessDenied => "AccessDenied",
            Self::ExpiredToken => "ExpiredToken",
            Self::Validation => "ValidationError",
            Self::ServiceFailure => "ServiceFailure",
        }
    }

    /// Classify a wire error code. Unknown codes are service failures.
    pub fn from_code(code: &str) -> Self {
        match code {
            "EntityAlreadyExists" | "EntityAlreadyExistsException" => Self::EntityAlreadyExists,
            "NoSuchEntity" | "NoSuchEntityException" => Self::NoSuchEntity,
            "LimitExceeded" | "LimitExceededException" => Self::LimitExceeded,
            "MalformedPolicyDocument" | "MalformedPolicyDocumentException" => {
                Self::MalformedPolicyDocument
            }
            "DeleteConflict" | "DeleteConflictException" => Self::DeleteConflict,
            "ResourceConflictException" | "ResourceInUseException" => Self::ResourceConflict,
            "ResourceNotFoundException" => Self::ResourceNotFound,
            "InvalidParameterValueException" => Self::InvalidParameterValue,
            "TooManyRequestsException" => Self::TooManyRequests,
            "RepositoryNotFoundException" => Self::RepositoryNotFound,
            "ImageNotFoundException" => Self::ImageNotFound,
            "Unauthorized" | "UnauthorizedException" => Self::Unauthorized,
            "AccessDenied" | "AccessDeniedException" => Self::AccessDenied,
            "ExpiredToken" | "ExpiredTokenException" => Self::ExpiredToken,
            "ValidationError" | "ValidationException" => Self::Validation,
            _ => Self::ServiceFailure,
        }
    }

    /// The resource already exists; callers take the update path.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::EntityAlreadyExists | Self::ResourceConflict)
    }

    /// The resource does not exist (yet, or anymore).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchEntity | Self::ResourceNotFound | Self::ImageNotFound
        )
    }

    /// Stale or missing registry/runtime credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::ExpiredToken)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call against an external API
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub resource: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.code.is_conflict()
    }

    pub fn is_not_found(&self) -> bool {
        self.code.is_not_found()
    }

    pub fn is_auth_failure(&self) -> bool {
        self.code.is_auth_failure()
    }
}

/// Errors surfaced by catalogs and drivers
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("manifest {manifest} resolves to config {existing} and {conflicting}")]
    Integrity {
        manifest: String,
        existing: String,
        conflicting: String,
    },

    #[error("timed out waiting for {waiter} on {resource} after {attempts} attempts")]
    WaiterTimeout {
        waiter: &'static str,
        resource: String,
        attempts: u32,
    },

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("container runtime: {0}")]
    Runtime(String),

    #[error("policy template: {0}")]
    Template(String),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Swallow NotFound outcomes, the way teardown expects.
pub fn tolerate_missing<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classification() {
        assert!(ErrorCode::from_code("EntityAlreadyExists").is_conflict());
        assert!(ErrorCode::from_code("ResourceConflictException").is_conflict());
        assert!(ErrorCode::from_code("NoSuchEntity").is_not_found());
        assert!(ErrorCode::from_code("ResourceNotFoundException").is_not_found());
        assert!(!ErrorCode::from_code("AccessDenied").is_not_found());
        assert_eq!(
            ErrorCode::from_code("SomethingNew"),
            ErrorCode::ServiceFailure
        );
    }

    #[test]
    fn test_api_error_display() {
        let error = ApiError::new(ErrorCode::NoSuchEntity, "role missing").with_resource("r");
        assert_eq!(error.to_string(), "NoSuchEntity: role missing");
        assert_eq!(error.resource.as_deref(), Some("r"));
    }

    #[test]
    fn test_tolerate_missing() {
        let missing: Result<(), ApiError> = Err(ApiError::new(ErrorCode::ResourceNotFound, "gone"));
        assert!(tolerate_missing(missing).unwrap().is_none());

        let denied: Result<(), ApiError> = Err(ApiError::new(ErrorCode::AccessDenied, "no"));
        assert!(tolerate_missing(denied).is_err());
    }
}
