//! Error types for the orchestrator.
//!
//! Errors are attached to the step they concern wherever possible; only
//! conditions that prevent a pipeline from starting surface as a
//! [`SiabError`].

use crate::core::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum SiabError {
    /// Configuration could not be loaded or validated.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Host resource requirements are unmet.
    #[error("{0}")]
    Preflight(#[from] PreflightError),

    /// The step registry is malformed.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// The safety guard could not be established at run start.
    #[error("{0}")]
    Safety(#[from] SafetyViolation),

    /// A destructive action was not confirmed.
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    /// The operator declined a destructive action.
    #[error("Aborted by operator")]
    Aborted,

    /// A collaborator failed outside of any step.
    #[error("{0}")]
    Collab(#[from] CollabError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A key carried a value that could not be parsed.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Cannot read config file {path}: {reason}")]
    File {
        /// File path.
        path: String,
        /// Underlying error.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the host does not meet resource requirements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Preflight failed: {}", failures.join("; "))]
pub struct PreflightError {
    /// Every unmet requirement.
    pub failures: Vec<String>,
}

/// Error raised when a registry cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two steps share an identifier.
    #[error("Duplicate step id '{0}' in registry")]
    DuplicateStep(String),

    /// A step has an empty identifier.
    #[error("Step at position {0} has an empty id")]
    EmptyId(usize),
}

/// Raised when the management channel cannot be confirmed or restored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Safety violation{}: {reason}", channel.as_ref().map(|c| format!(" on {c}")).unwrap_or_default())]
pub struct SafetyViolation {
    /// Description of the management channel, if one was detected.
    pub channel: Option<String>,
    /// Why the guard could not vouch for the channel.
    pub reason: String,
}

impl SafetyViolation {
    /// Creates a new safety violation.
    #[must_use]
    pub fn new(channel: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}

/// Errors from collaborators (subprocesses, cluster API, packet filter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    /// The program could not be started.
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        reason: String,
    },

    /// The program exited non-zero.
    #[error("'{command}' exited with {code}: {output}")]
    Exit {
        /// Rendered command line.
        command: String,
        /// Exit code (-1 when killed by a signal).
        code: i32,
        /// Trimmed combined output.
        output: String,
    },

    /// The call did not finish in time.
    #[error("'{command}' timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Rendered command line.
        command: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The collaborator answered with something unparseable.
    #[error("Malformed response from {source_name}: {reason}")]
    Malformed {
        /// What produced the response.
        source_name: String,
        /// Parse failure.
        reason: String,
    },
}

/// Error returned by a step's probe, apply or verify.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The probe could not determine system state.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The apply failed.
    #[error("Apply failed: {0}")]
    Apply(String),

    /// The post-condition check failed.
    #[error("Verification failed: {0}")]
    Verify(String),

    /// A bounded wait expired.
    #[error("Timed out after {}s waiting for {what}", after.as_secs())]
    Timeout {
        /// What was being waited for.
        what: String,
        /// How long was waited.
        after: Duration,
    },

    /// The safety guard refused to let the mutation proceed.
    #[error("{0}")]
    Safety(#[from] SafetyViolation),

    /// A collaborator call failed.
    #[error("{0}")]
    Collab(#[from] CollabError),

    /// The run was interrupted.
    #[error("Interrupted")]
    Interrupted,
}

impl StepError {
    /// Creates an apply error.
    #[must_use]
    pub fn apply(message: impl Into<String>) -> Self {
        Self::Apply(message.into())
    }

    /// Creates a verify error.
    #[must_use]
    pub fn verify(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }

    /// Creates a probe error.
    #[must_use]
    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe(message.into())
    }

    /// Classifies the error for the step record.
    ///
    /// `during_verify` distinguishes a generic failure raised by the verify
    /// hook from one raised by the apply.
    #[must_use]
    pub const fn failure_kind(&self, during_verify: bool) -> FailureKind {
        match self {
            Self::Safety(_) => FailureKind::Safety,
            Self::Timeout { .. } | Self::Collab(CollabError::Timeout { .. }) => FailureKind::Timeout,
            Self::Interrupted => FailureKind::Interrupted,
            Self::Verify(_) => FailureKind::Verify,
            Self::Probe(_) => FailureKind::Probe,
            _ if during_verify => FailureKind::Verify,
            _ => FailureKind::Apply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_error_lists_every_failure() {
        let err = PreflightError {
            failures: vec!["cpus: 2 < 4".to_string(), "memory: 4GiB < 8GiB".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("cpus: 2 < 4"));
        assert!(text.contains("memory: 4GiB < 8GiB"));
    }

    #[test]
    fn test_safety_violation_display() {
        let err = SafetyViolation::new(Some("ssh from 10.0.0.5 on port 22".to_string()), "rule missing");
        assert_eq!(
            err.to_string(),
            "Safety violation on ssh from 10.0.0.5 on port 22: rule missing"
        );

        let bare = SafetyViolation::new(None, "no channel");
        assert_eq!(bare.to_string(), "Safety violation: no channel");
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(StepError::apply("x").failure_kind(false), FailureKind::Apply);
        assert_eq!(StepError::apply("x").failure_kind(true), FailureKind::Verify);
        assert_eq!(StepError::verify("x").failure_kind(false), FailureKind::Verify);
        assert_eq!(
            StepError::Safety(SafetyViolation::new(None, "x")).failure_kind(false),
            FailureKind::Safety
        );
        assert_eq!(
            StepError::Timeout {
                what: "pods".to_string(),
                after: Duration::from_secs(5)
            }
            .failure_kind(true),
            FailureKind::Timeout
        );
        assert_eq!(StepError::Interrupted.failure_kind(false), FailureKind::Interrupted);
        assert_eq!(StepError::probe("x").failure_kind(false), FailureKind::Probe);
    }

    #[test]
    fn test_collab_error_conversion() {
        let err: StepError = CollabError::Exit {
            command: "helm status".to_string(),
            code: 1,
            output: "release: not found".to_string(),
        }
        .into();
        assert!(err.to_string().contains("helm status"));
    }
}
