//! Error types for the load engine

use thiserror::Error;

/// Main error type for load engine operations
#[derive(Debug, Error, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LoadError {
    #[error("Unsupported field type '{type_tag}' for field '{field}'")]
    UnsupportedFieldType { field: String, type_tag: String },

    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Unknown proxy rotation strategy: {strategy}")]
    UnknownStrategy { strategy: String },

    #[error("Proxy not found: {url}")]
    ProxyNotFound { url: String },

    #[error("Transport error: {details}")]
    Transport { details: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Serialization error: {error}")]
    Serialization { error: String },

    #[error("Test not found: {test_id}")]
    TestNotFound { test_id: String },
}

impl LoadError {
    /// Create an invalid configuration error with field and reason
    pub fn invalid_config(field: &str, reason: &str) -> Self {
        Self::InvalidConfig {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a transport error
    pub fn transport(details: impl Into<String>) -> Self {
        Self::Transport {
            details: details.into(),
        }
    }

    /// Create a proxy-not-found error
    pub fn proxy_not_found(url: &str) -> Self {
        Self::ProxyNotFound {
            url: url.to_string(),
        }
    }

    /// Whether the error is recorded against a single trial instead of
    /// aborting the run.
    pub fn is_trial_level(&self) -> bool {
        match self {
            LoadError::NoProxiesAvailable => true,
            LoadError::UnknownStrategy { .. } => true,
            LoadError::ProxyNotFound { .. } => true,
            LoadError::Transport { .. } => true,

            LoadError::UnsupportedFieldType { .. } => false,
            LoadError::InvalidConfig { .. } => false,
            LoadError::Serialization { .. } => false,
            LoadError::TestNotFound { .. } => false,
        }
    }

    /// Get error category for grouping and filtering
    pub fn category(&self) -> ErrorCategory {
        match self {
            LoadError::UnsupportedFieldType { .. } => ErrorCategory::Configuration,
            LoadError::InvalidConfig { .. } => ErrorCategory::Configuration,
            LoadError::UnknownStrategy { .. } => ErrorCategory::Configuration,

            LoadError::NoProxiesAvailable => ErrorCategory::ProxyPool,
            LoadError::ProxyNotFound { .. } => ErrorCategory::ProxyPool,

            LoadError::Transport { .. } => ErrorCategory::Transport,

            LoadError::Serialization { .. } => ErrorCategory::Runtime,
            LoadError::TestNotFound { .. } => ErrorCategory::Runtime,
        }
    }
}

/// Error categories for grouping and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ProxyPool,
    Transport,
    Runtime,
}

impl From<serde_json::Error> for LoadError {
    fn from(error: serde_json::Error) -> Self {
        LoadError::Serialization {
            error: error.to_string(),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => LoadError::InvalidConfig {
                field: "file".to_string(),
                reason: format!("File not found: {}", error),
            },
            _ => LoadError::Transport {
                details: error.to_string(),
            },
        }
    }
}

/// Result type for load engine operations
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_trial_level() {
        assert!(LoadError::NoProxiesAvailable.is_trial_level());
        assert!(LoadError::proxy_not_found("http://p1:8080").is_trial_level());
        assert!(LoadError::transport("connection refused").is_trial_level());
        assert!(!LoadError::invalid_config("num_requests", "must be positive").is_trial_level());
    }

    #[test]
    fn test_error_categories() {
        let err = LoadError::UnsupportedFieldType {
            field: "age".to_string(),
            type_tag: "blob".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(LoadError::NoProxiesAvailable.category(), ErrorCategory::ProxyPool);
        assert_eq!(LoadError::transport("reset").category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_error_messages() {
        let err = LoadError::UnknownStrategy {
            strategy: "random".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown proxy rotation strategy: random");
        assert_eq!(
            LoadError::proxy_not_found("http://p1:8080").to_string(),
            "Proxy not found: http://p1:8080"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        assert!(matches!(LoadError::from(io), LoadError::InvalidConfig { .. }));

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(LoadError::from(io), LoadError::Transport { .. }));
    }
}
