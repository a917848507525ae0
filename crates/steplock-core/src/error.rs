//! Structured errors
//!
//! Every failure carries a stable code so hosts can decide between retrying,
//! re-picking the target, or surfacing the fault. Replay faults also name the
//! step that failed.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Identifies the step an error happened on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    /// Zero-based position in the step list at the time of the fault
    pub position: usize,
    /// Stable step index as shown to the user
    pub index: u32,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoWindowUnderCursor,
    SelfTargeted,
    WindowGone,
    TargetLost,
    TargetNotFound,
    InjectionRejected,
    ProjectLoadMalformed,
    SpreadsheetExportFailed,
    ModeConflict,
    EditLocked,
    InvalidStep,
    WaitTimedOut,
    CaptureFailed,
    InvalidConfig,
    Cancelled,
    PlatformUnavailable,
    Io,
    Unknown,
}

impl ErrorCode {
    /// Recoverable codes leave the engine usable after a re-pick or retry.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorCode::NoWindowUnderCursor
                | ErrorCode::SelfTargeted
                | ErrorCode::WindowGone
                | ErrorCode::TargetLost
        )
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            step: None,
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn at_step(mut self, position: usize, index: u32, kind: impl Into<String>) -> Self {
        self.step = Some(StepRef {
            position,
            index,
            kind: kind.into(),
        });
        self
    }

    pub fn no_window_under_cursor(x: i32, y: i32) -> Self {
        Self::new(
            ErrorCode::NoWindowUnderCursor,
            format!("No window under the cursor at ({}, {})", x, y),
        )
        .with_suggestions(vec!["Click inside the window you want to automate".into()])
    }

    pub fn self_targeted(title: &str) -> Self {
        Self::new(
            ErrorCode::SelfTargeted,
            format!("'{}' belongs to this tool and cannot be targeted", title),
        )
        .with_suggestions(vec!["Click the application window instead".into()])
    }

    pub fn window_gone(handle: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::WindowGone,
            format!("Window {} no longer exists", handle),
        )
    }

    pub fn target_lost(title: &str) -> Self {
        Self::new(
            ErrorCode::TargetLost,
            format!("Target window '{}' is gone", title),
        )
        .with_suggestions(vec![
            "Re-open the application and pick its window again".into(),
        ])
    }

    pub fn target_not_found(descriptor: &str) -> Self {
        Self::new(
            ErrorCode::TargetNotFound,
            format!("No open window matches {}", descriptor),
        )
    }

    pub fn injection_rejected(action: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::InjectionRejected,
            format!("{} was rejected: {}", action, reason),
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProjectLoadMalformed, message)
    }

    pub fn export_failed(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SpreadsheetExportFailed,
            format!("Spreadsheet export failed: {}", reason),
        )
    }

    pub fn mode_conflict(wanted: &str, current: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::ModeConflict,
            format!("Cannot {} while {:?}", wanted, current),
        )
    }

    pub fn edit_locked() -> Self {
        Self::new(
            ErrorCode::EditLocked,
            "Steps cannot be edited while a replay or recording is active",
        )
    }

    pub fn invalid_step(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStep, message)
    }

    pub fn platform_unavailable(what: &str) -> Self {
        Self::new(
            ErrorCode::PlatformUnavailable,
            format!("{} is only available on Windows", what),
        )
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(
                f,
                "[{:?}] step {} ({}): {}",
                self.code, step.index, step.kind, self.message
            ),
            None => write!(f, "[{:?}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Unknown, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, e.to_string())
    }
}
