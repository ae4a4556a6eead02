//! Error types for the quickstart

use std::time::Duration;

use thiserror::Error;

/// Main error type for quickstart operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A required external tool is not on PATH
    #[error("{tool} not found. {hint}")]
    ToolNotFound {
        /// Executable name that was looked up
        tool: String,
        /// Where to get it
        hint: String,
    },

    /// Version output of a tool could not be understood
    #[error("could not parse {tool} version from output {output:?}")]
    VersionParse {
        /// Tool whose version was queried
        tool: String,
        /// Raw output that failed to parse
        output: String,
    },

    /// An external command exited unsuccessfully or could not be started
    #[error("`{command}` failed ({status}): {output}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured stdout and stderr
        output: String,
    },

    /// A readiness wait never observed its condition
    #[error("timed out after {elapsed:?} waiting for {what}: {last_error}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// Time spent polling
        elapsed: Duration,
        /// Last error reported by the readiness check
        last_error: String,
    },

    /// Failure inside a named installation stage
    #[error("{label}: {source}")]
    Step {
        /// Stage name, e.g. "kourier" or "serving core"
        label: String,
        /// Underlying failure
        source: Box<Error>,
    },

    /// Invalid configuration value
    #[error("validation error: {message}")]
    Validation {
        /// What is wrong
        message: String,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Wrap this error with a stage label
    pub fn in_step(self, label: impl Into<String>) -> Self {
        Error::Step {
            label: label.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error beneath any step labels
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Extension trait for labelling failures with the stage they happened in.
///
/// Errors unwind as `serving core: serving core apply: ...` breadcrumbs
/// instead of a bare exit code.
pub trait StepExt<T> {
    /// Wrap an error with `label`
    fn step(self, label: &str) -> crate::Result<T>;
}

impl<T> StepExt<T> for crate::Result<T> {
    fn step(self, label: &str) -> crate::Result<T> {
        self.map_err(|e| e.in_step(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a failed apply deep in the serving install reads as a trail
    ///
    /// The user sees which stage broke and the tool's own output without
    /// rerunning with more verbosity.
    #[test]
    fn story_step_labels_build_breadcrumbs() {
        let failed = Error::CommandFailed {
            command: "kubectl apply -f serving-core.yaml".to_string(),
            status: "exit status: 1".to_string(),
            output: "connection refused".to_string(),
        };
        let result: crate::Result<()> = Err(failed);
        let err = result.step("serving core").step("serving").unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("serving: serving core: `kubectl apply"));
        assert!(msg.contains("connection refused"));
        assert!(matches!(err.root_cause(), Error::CommandFailed { .. }));
    }

    /// Story: a missing tool is reported with an install hint
    #[test]
    fn story_missing_tool_has_hint() {
        let err = Error::ToolNotFound {
            tool: "kind".to_string(),
            hint: "Install kind: https://kind.sigs.k8s.io".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "kind not found. Install kind: https://kind.sigs.k8s.io"
        );
    }

    /// Story: unreadable version output is a config problem, not a mismatch
    #[test]
    fn story_version_parse_is_distinct_from_mismatch() {
        let err = Error::VersionParse {
            tool: "minikube".to_string(),
            output: "garbage".to_string(),
        };
        assert!(err.to_string().contains("could not parse minikube version"));
        assert!(!err.to_string().contains("below"));
    }

    #[test]
    fn root_cause_of_unwrapped_error_is_itself() {
        let err = Error::validation("cluster name must not be empty");
        assert!(matches!(err.root_cause(), Error::Validation { .. }));
        assert_eq!(
            err.to_string(),
            "validation error: cluster name must not be empty"
        );
    }
}
