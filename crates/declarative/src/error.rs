//! Error types for resolution and building.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while resolving specs or running target code.
///
/// [`BuildError::Stop`] is not a failure: it is the intentional early halt
/// of a target and is reported to observers as a stop rather than an error.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No registered resolver claims the spec
    #[error("no resolver found for `{spec}`")]
    NoResolverFound {
        /// The raw spec that nobody claimed
        spec: String,
    },

    /// Neither the dep nor the default table defines the action
    #[error("action `{name}` not found on {owner}")]
    ActionNotFound {
        /// Requested action name or alias
        name: String,
        /// Fqn of the dep that was asked, or `(global)`
        owner: String,
    },

    /// A scope lookup failed
    #[error("`{key}` is not defined in scope")]
    KeyNotFound {
        /// Missing key
        key: String,
    },

    /// Target code reported a failure
    #[error("{message}")]
    Target {
        /// Human readable description
        message: String,
    },

    /// A checked command exited non-zero
    #[error("command `{cmd}` exited with code {code}")]
    Command {
        /// The command line as run
        cmd: String,
        /// Exit code (-1 when killed by a signal)
        code: i32,
    },

    /// File system or process spawning failure
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Template compilation or rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// A build unit could not be loaded
    #[error("invalid build unit {unit}: {message}")]
    Manifest {
        /// Unit directory relative to the configs root
        unit: String,
        /// Parse or validation message
        message: String,
    },

    /// An action was called with arguments it cannot use
    #[error("invalid arguments for `{action}`: {message}")]
    InvalidArgs {
        /// Action name
        action: String,
        /// What was wrong
        message: String,
    },

    /// A dep requested itself while it was being built
    #[error("dependency cycle through `{fqn}`")]
    Cycle {
        /// Fqn of the dep that is already building
        fqn: String,
    },

    /// A dep that already failed was requested again
    #[error("`{fqn}` failed earlier: {message}")]
    PreviouslyFailed {
        /// Fqn of the failed dep
        fqn: String,
        /// Original failure
        message: String,
    },

    /// Intentional halt requested by target code
    #[error("stopped: {reason}")]
    Stop {
        /// Why the target stopped
        reason: String,
        /// Optional structured payload
        data: Option<Value>,
    },

    /// The observer asked the build to shut down
    #[error("build interrupted")]
    Interrupted,

    /// Event transport failed
    #[error(transparent)]
    Transport(#[from] optrace::TransportError),
}

impl BuildError {
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_args(action: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            action: action.to_string(),
            message: message.into(),
        }
    }

    /// Muting policy never applies to these.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// The error and each of its sources, one per line.
    pub fn trace(&self) -> String {
        let mut trace = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }
}

/// Result type for engine operations.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_includes_sources() {
        let err = BuildError::io(
            "creating ~/.config",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let trace = err.trace();
        assert!(trace.starts_with("creating ~/.config: denied"));
        assert!(trace.contains("caused by: denied"));
    }

    #[test]
    fn test_display_messages() {
        let err = BuildError::Command {
            cmd: "false".into(),
            code: 1,
        };
        assert_eq!(err.to_string(), "command `false` exited with code 1");
        assert!(BuildError::Interrupted.is_interrupt());
    }
}
