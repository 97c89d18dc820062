//! Error taxonomy for the action pipeline.
//!
//! [`ActionError`] never crosses the executor boundary as an `Err`; it is
//! folded into an `ExecResult` with its [`ErrorKind`] so the stored record
//! keeps both a plain-language summary and the internal detail.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionStatus;

/// Stable, serializable category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    PathEscape,
    PatchMismatch,
    Command,
    BundleStep,
    Backup,
    Io,
    Oracle,
}

impl ErrorKind {
    /// Non-technical text shown to end users.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "The request was missing something it needs to run.",
            ErrorKind::PathEscape => "That file is outside the project, so I left it alone.",
            ErrorKind::PatchMismatch => {
                "The file no longer matches what I planned to change, so nothing was modified."
            }
            ErrorKind::Command => "The command ran but reported a problem.",
            ErrorKind::BundleStep => "One of the steps failed, so the remaining steps were skipped.",
            ErrorKind::Backup => "I couldn't save or restore a backup of that file.",
            ErrorKind::Io => "Something went wrong reading or writing files.",
            ErrorKind::Oracle => "I couldn't come up with a plan for that right now.",
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("path escapes project root: {0}")]
    PathEscape(String),
    #[error("patch mismatch: {0}")]
    PatchMismatch(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("bundle step {index} failed: {message}")]
    BundleStep { index: usize, message: String },
    #[error("backup error: {0}")]
    Backup(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Validation(_) => ErrorKind::Validation,
            ActionError::PathEscape(_) => ErrorKind::PathEscape,
            ActionError::PatchMismatch(_) => ErrorKind::PatchMismatch,
            ActionError::Command(_) => ErrorKind::Command,
            ActionError::BundleStep { .. } => ErrorKind::BundleStep,
            ActionError::Backup(_) => ErrorKind::Backup,
            ActionError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ActionError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn missing(field: &str) -> Self {
        ActionError::Validation(format!("missing required field `{field}`"))
    }
}

/// Failure at the language-model boundary. Always converted into a safe
/// fallback by the turn loop.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle failed: {0}")]
    Failed(String),
    #[error("oracle output unparsable: {0}")]
    Unparsable(String),
}

/// Rejected gate operations (approve/reject/rollback on the wrong record).
#[derive(Debug, Error)]
pub enum GateError {
    #[error("action '{0}' not found")]
    NotFound(String),
    #[error("action '{id}' is {status}; cannot {operation}")]
    InvalidTransition {
        id: String,
        status: ActionStatus,
        operation: &'static str,
    },
    #[error("action '{0}' has nothing to roll back")]
    NothingToRollBack(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
}

impl GateError {
    pub fn user_message(&self) -> String {
        match self {
            GateError::NotFound(_) => "I couldn't find that action.".to_string(),
            GateError::InvalidTransition { status, .. } => {
                format!("That action is already {status}.")
            }
            GateError::NothingToRollBack(_) => "There is nothing to undo for that action.".to_string(),
            GateError::InvalidAction(msg) => format!("That action isn't valid: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(ActionError::missing("path").kind(), ErrorKind::Validation);
        assert_eq!(
            ActionError::BundleStep {
                index: 2,
                message: "x".to_string()
            }
            .kind(),
            ErrorKind::BundleStep
        );
        let io = ActionError::io("read a.txt", std::io::Error::other("boom"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(io.to_string(), "read a.txt: boom");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PatchMismatch).expect("serialize");
        assert_eq!(json, "\"patch_mismatch\"");
    }
}
