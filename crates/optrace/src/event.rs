//! Operation lifecycle events and their NDJSON wire form.
//!
//! Every event except [`Event::Debug`] carries the [`OpPath`] of the
//! operation it belongs to. A path is the parent's path plus one id that is
//! minted when the operation starts, so a consumer can always find the
//! parent of any event by dropping the last element.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Hierarchical address of an operation: the chain of ids from the root.
pub type OpPath = Vec<String>;

/// Attribute map attached to operations.
pub type Data = Map<String, Value>;

/// One operation lifecycle event.
///
/// Serialized as an object tagged by `type`. Decoding an unrecognised tag
/// yields [`Event::Unknown`] so older observers keep working against newer
/// workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// An operation was opened
    #[serde(rename = "op/start")]
    Start {
        op: String,
        path: OpPath,
        #[serde(default)]
        data: Data,
        ts: DateTime<Utc>,
    },

    /// One line of output produced by an operation
    #[serde(rename = "op/log")]
    Log { op: String, path: OpPath, line: String },

    /// Attributes merged into the operation's data (overwrite by key)
    #[serde(rename = "op/progress")]
    Progress {
        op: String,
        path: OpPath,
        #[serde(default)]
        data: Data,
    },

    /// Terminal failure with a rendered message and the full error chain
    #[serde(rename = "op/error")]
    Error {
        op: String,
        path: OpPath,
        error: String,
        #[serde(default)]
        trace: String,
    },

    /// Intentional early halt, distinct from failure
    #[serde(rename = "op/stop")]
    Stop {
        op: String,
        path: OpPath,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// The operation is closed; emitted exactly once per operation
    #[serde(rename = "op/finish")]
    Finish {
        op: String,
        path: OpPath,
        ts: DateTime<Utc>,
    },

    /// Diagnostic message not tied to the operation tree
    #[serde(rename = "internal/debug")]
    Debug {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<OpPath>,
    },

    /// Any event kind this build does not know about
    #[serde(other)]
    Unknown,
}

impl Event {
    /// Path of the operation this event belongs to.
    pub fn path(&self) -> Option<&[String]> {
        match self {
            Self::Start { path, .. }
            | Self::Log { path, .. }
            | Self::Progress { path, .. }
            | Self::Error { path, .. }
            | Self::Stop { path, .. }
            | Self::Finish { path, .. } => Some(path),
            Self::Debug { path, .. } => path.as_deref(),
            Self::Unknown => None,
        }
    }

    /// Operation kind (e.g. `run/sh`), when the event carries one.
    pub fn op(&self) -> Option<&str> {
        match self {
            Self::Start { op, .. }
            | Self::Log { op, .. }
            | Self::Progress { op, .. }
            | Self::Error { op, .. }
            | Self::Stop { op, .. }
            | Self::Finish { op, .. } => Some(op),
            Self::Debug { .. } | Self::Unknown => None,
        }
    }

    /// Short tag used in plain-text output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Log { .. } => "log",
            Self::Progress { .. } => "progress",
            Self::Error { .. } => "error",
            Self::Stop { .. } => "stop",
            Self::Finish { .. } => "finish",
            Self::Debug { .. } => "debug",
            Self::Unknown => "unknown",
        }
    }

    /// Encode as a single NDJSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one NDJSON line.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Messages the observer sends back to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Stop building as soon as the current operation allows
    Shutdown,

    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

// ============================================================================
// Tests
// ============================================================================
