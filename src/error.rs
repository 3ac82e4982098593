//! Error types for the NAS configuration manager
//!
//! Provides structured error types for all components including the REST
//! client, the reconciliation helpers, and the per-resource managers.

use thiserror::Error;

/// Unified error type for the configuration manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Local Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Remote API Errors
    // =========================================================================
    #[error("{operation} failed: HTTP {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation} failed: {source}")]
    Request {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed: unexpected response body: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Resource not found: {kind} {name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Pagination aborted after {pages} pages: resume token never drained")]
    PaginationOverflow { pages: usize },

    // =========================================================================
    // Plan / Input Errors
    // =========================================================================
    #[error("Plan parse error: {0}")]
    PlanParse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Validation failure for a specific resource parameter.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Wrap a transport error with an operation-specific prefix.
    pub fn request(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Request {
            operation: operation.into(),
            source,
        }
    }

    /// Remote API rejection with an operation-specific prefix.
    pub fn api(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// True for failures detected locally before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// True for remote rejections and transport failures.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Api { .. } | Error::Request { .. } | Error::Decode { .. }
        )
    }
}

/// Result type alias for the configuration manager
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_operation_prefix() {
        let err = Error::api("Creating NFS export", 409, "export already exists");
        let text = err.to_string();
        assert!(text.starts_with("Creating NFS export failed"));
        assert!(text.contains("409"));
        assert!(text.contains("export already exists"));
    }

    #[test]
    fn test_error_classification() {
        let err = Error::validation("quota thresholds out of order");
        assert!(err.is_validation());
        assert!(!err.is_remote());

        let err = Error::api("Modifying SMB share", 500, "internal");
        assert!(err.is_remote());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_pagination_overflow_message() {
        let err = Error::PaginationOverflow { pages: 10_000 };
        assert!(err.to_string().contains("10000 pages"));
    }
}
