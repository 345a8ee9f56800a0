//! Core value types shared by resolvers, actions and the engine

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dep::DepId;

/// Outcome of an external-tool resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    /// The tool changed the system
    Installed,
    /// Already in the requested state
    Unchanged,
    /// The tool reported failure
    Failed,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What resolving a spec produced
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// A graph node (file targets, tool deps)
    Dep(DepId),
    /// A filesystem path (path/dir resolvers)
    Path(PathBuf),
    /// Result of an external tool run
    Status(InstallStatus),
    /// Arbitrary value from a custom resolver
    Value(Value),
    /// Degraded result of a muted failure
    Nothing,
}

/// Return value of an action call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing to return, or the call was muted or stopped
    None,
    Text(String),
    Resolved(Resolved),
    Command(CommandResult),
}

/// Exit code and output lines of a finished command
///
/// Truthiness follows the exit code: a result is successful only when the
/// command exited with 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub logs: Vec<String>,
}

impl CommandResult {
    /// Placeholder for a command whose failure was muted before it produced
    /// a result
    pub fn muted() -> Self {
        Self {
            exit_code: -1,
            logs: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// All output lines joined with newlines
    pub fn output(&self) -> String {
        self.logs.join("\n")
    }

    /// Substring check against the aggregated output
    pub fn contains(&self, needle: &str) -> bool {
        self.output().contains(needle)
    }
}

/// Options for an engine instance
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory holding the root build unit
    pub root: PathBuf,
    /// File name of a build unit inside its directory
    pub build_file: String,
    /// Resolver assumed when a spec has no `name::` prefix
    pub default_resolver: String,
    /// Environment variable holding the sudo password
    pub sudo_password_env: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            build_file: ".confbuild.toml".to_string(),
            default_resolver: "conf".to_string(),
            sudo_password_env: "CONFCTL_SUDO_PASS".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_truthiness() {
        let ok = CommandResult {
            exit_code: 0,
            logs: vec!["Python 3.12.1".into(), "done".into()],
        };
        assert!(ok.success());
        assert!(ok.contains("3.12"));
        assert!(!ok.contains("3.11"));
        assert_eq!(ok.output(), "Python 3.12.1\ndone");

        assert!(!CommandResult::muted().success());
    }

    #[test]
    fn test_install_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&InstallStatus::Unchanged).unwrap(),
            "\"unchanged\""
        );
        assert!(!InstallStatus::Failed.is_success());
    }
}
