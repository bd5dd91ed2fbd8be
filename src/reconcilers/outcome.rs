//! Structured result of one rotation attempt

use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use thiserror::Error;

use crate::adapters::EventKind;
use crate::error::Error;
use crate::queue::AttemptOutcome;

/// Metric label used when no finer classification applies
pub const REASON_FAILED_TO_ROTATE: &str = "FailedToRotate";

/// Furthest pipeline stage an attempt reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvePod,
    ResolveClaim,
    BuildRequest,
    ProviderMount,
    PersistStatus,
    SecretFanOut,
    /// All stages ran
    Complete,
    /// The pod is terminating or finished, nothing was done
    Skipped,
}

/// Event to publish against the pod once the attempt is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub kind: EventKind,
    pub reason: &'static str,
    pub message: String,
}

/// Failure of a single secret object during the fan-out
#[derive(Error, Debug)]
pub enum SecretObjectError {
    #[error("secret object {secret} failed validation: {source}")]
    Validation { secret: String, source: Error },

    #[error("failed to get data for secret {secret}: {source}")]
    Data { secret: String, source: Error },

    #[error("failed to patch secret {secret}: {source}")]
    Patch { secret: String, source: Error },
}

impl SecretObjectError {
    /// Name of the secret the failure belongs to
    pub fn secret(&self) -> &str {
        match self {
            SecretObjectError::Validation { secret, .. }
            | SecretObjectError::Data { secret, .. }
            | SecretObjectError::Patch { secret, .. } => secret,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SecretObjectError::Validation { .. } | SecretObjectError::Data { .. } => {
                "SecretValidationFailed"
            }
            SecretObjectError::Patch { .. } => "SecretPatchFailed",
        }
    }
}

/// Classified failure of a rotation attempt
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("failed to get pod {pod}: {source}")]
    PodNotFound { pod: String, source: Error },

    #[error("failed to get secret provider class {class}: {source}")]
    ClaimNotFound { class: String, source: Error },

    #[error("could not find volume for secret provider class {class} in pod {pod}")]
    VolumeNotFound { class: String, pod: String },

    #[error("target path {target_path} did not match pod {field} for pod {pod}")]
    UnexpectedTargetPath {
        pod: String,
        target_path: String,
        field: &'static str,
    },

    #[error("failed to get node publish secret {secret}: {source}")]
    CredentialSecretNotFound { secret: String, source: Error },

    #[error("failed to build mount request: {0}")]
    Serialization(Error),

    #[error("failed to create provider client for {provider}: {source}")]
    ProviderClientCreationFailed { provider: String, source: Error },

    #[error("failed to rotate objects for pod {pod}: {source}")]
    ProviderMountFailed {
        pod: String,
        code: Option<String>,
        source: Error,
    },

    #[error("failed to update versions in pod status {key}: {source}")]
    StatusWriteFailed { key: String, source: Error },

    #[error("failed to get mounted files at {target_path}: {source}")]
    MountedFilesUnreadable { target_path: String, source: Error },

    #[error("failed to rotate {} secret object(s): {}", .failures.len(), join_failures(.failures))]
    SecretRotationFailed { failures: Vec<SecretObjectError> },
}

fn join_failures(failures: &[SecretObjectError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RotationError {
    /// Label used for the error metric
    pub fn reason(&self) -> &str {
        match self {
            RotationError::PodNotFound { .. } => "PodNotFound",
            RotationError::ClaimNotFound { .. } => "SecretProviderClassNotFound",
            RotationError::VolumeNotFound { .. } => "PodVolumeNotFound",
            RotationError::UnexpectedTargetPath { .. } => "UnexpectedTargetPath",
            RotationError::CredentialSecretNotFound { .. } => "NodePublishSecretRefNotFound",
            RotationError::ProviderClientCreationFailed { .. } => {
                "FailedToCreateProviderGRPCClient"
            }
            RotationError::ProviderMountFailed {
                code: Some(code), ..
            } => code,
            RotationError::StatusWriteFailed { .. } => "StatusWriteFailed",
            RotationError::MountedFilesUnreadable { .. } => "FailedToGetMountedFiles",
            // A patch failure outranks validation failures in the same fan-out
            RotationError::SecretRotationFailed { failures } => failures
                .iter()
                .map(SecretObjectError::reason)
                .max_by_key(|reason| *reason == "SecretPatchFailed")
                .unwrap_or(REASON_FAILED_TO_ROTATE),
            RotationError::ProviderMountFailed { .. } | RotationError::Serialization(_) => {
                REASON_FAILED_TO_ROTATE
            }
        }
    }
}

/// Everything the reporting step needs to know about an attempt
#[derive(Debug)]
pub struct RotationOutcome {
    /// Queue key of the pod status
    pub key: String,
    pub stage: Stage,
    /// Provider of the class, once resolved
    pub provider: Option<String>,
    /// Whether the provider reported different versions
    pub requires_update: bool,
    /// Pod the events are attached to, once resolved
    pub pod: Option<ObjectReference>,
    pub events: Vec<RotationEvent>,
    pub elapsed: Duration,
    pub result: Result<(), RotationError>,
}

impl RotationOutcome {
    /// Whether the attempt finished without error
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Provider label for metrics, empty before the class was resolved
    pub fn provider_label(&self) -> &str {
        self.provider.as_deref().unwrap_or_default()
    }

    /// Queue classification of the attempt
    ///
    /// Pipeline failures always take the fixed-delay path; only a pod status
    /// missing from the cache is retried on the not-found budget.
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self.result {
            Ok(()) => AttemptOutcome::Success,
            Err(_) => AttemptOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_code_is_used_as_reason() {
        let err = RotationError::ProviderMountFailed {
            pod: "default/app".to_string(),
            code: Some("GRPCProviderError".to_string()),
            source: Error::provider("boom"),
        };
        assert_eq!(err.reason(), "GRPCProviderError");

        let err = RotationError::ProviderMountFailed {
            pod: "default/app".to_string(),
            code: None,
            source: Error::provider("boom"),
        };
        assert_eq!(err.reason(), REASON_FAILED_TO_ROTATE);
    }

    #[test]
    fn aggregate_error_lists_every_failed_secret() {
        let err = RotationError::SecretRotationFailed {
            failures: vec![
                SecretObjectError::Validation {
                    secret: "one".to_string(),
                    source: Error::validation("secret name is empty"),
                },
                SecretObjectError::Patch {
                    secret: "two".to_string(),
                    source: Error::not_found("Secret", "default/two"),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("failed to rotate 2 secret object(s)"));
        assert!(message.contains("one"));
        assert!(message.contains("two"));
        assert_eq!(err.reason(), "SecretPatchFailed");
    }

    #[test]
    fn late_stage_failures_have_their_own_reasons() {
        let err = RotationError::StatusWriteFailed {
            key: "default/app-default-spc".to_string(),
            source: Error::Conflict("stale".to_string()),
        };
        assert_eq!(err.reason(), "StatusWriteFailed");

        let err = RotationError::MountedFilesUnreadable {
            target_path: "/var/lib/kubelet/pods".to_string(),
            source: Error::validation("missing"),
        };
        assert_eq!(err.reason(), "FailedToGetMountedFiles");

        let err = RotationError::SecretRotationFailed {
            failures: vec![SecretObjectError::Data {
                secret: "one".to_string(),
                source: Error::validation("file matching objectName db not found"),
            }],
        };
        assert_eq!(err.reason(), "SecretValidationFailed");

        let err = RotationError::Serialization(Error::validation("bad attributes"));
        assert_eq!(err.reason(), REASON_FAILED_TO_ROTATE);
    }
}
