//! Error types for the rotation controller

use thiserror::Error;

/// Result type alias using the controller's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object missing from the cache or the API server
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Optimistic concurrency conflict on write
    #[error("Conflict writing {0}: object was modified since it was read")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider client error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider returned a mount error with a reason code
    #[error("Provider mount failed with code {code}: {message}")]
    ProviderMount { code: String, message: String },

    /// gRPC transport error
    #[error("Provider transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status returned by the provider
    #[error("Provider RPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML rendering error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Whether the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Reason code reported by the provider, if any
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Error::ProviderMount { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

/// Map a kube API error onto not-found / conflict where the status code says so
pub(crate) fn classify_kube_error(err: kube::Error, kind: &'static str, key: &str) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind, key),
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(format!("{} {}", kind, key)),
        other => Error::Kube(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn kube_404_is_classified_as_not_found() {
        let err = classify_kube_error(api_error(404), "Secret", "default/app");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Secret default/app not found");
    }

    #[test]
    fn kube_409_is_classified_as_conflict() {
        let err = classify_kube_error(api_error(409), "Secret", "default/app");
        assert!(matches!(err, Error::Conflict(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn provider_code_is_only_reported_when_present() {
        let with_code = Error::ProviderMount {
            code: "AccessDenied".to_string(),
            message: "denied".to_string(),
        };
        assert_eq!(with_code.provider_code(), Some("AccessDenied"));

        let without = Error::ProviderMount {
            code: String::new(),
            message: "denied".to_string(),
        };
        assert_eq!(without.provider_code(), None);
    }
}
