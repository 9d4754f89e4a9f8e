//! Error taxonomy for the harness.
//!
//! [`StepError`] covers everything that can go wrong while executing a
//! single step or probe. Those errors are always folded into a failed
//! [`StepResult`](crate::model::StepResult) by the runner. [`HarnessError`]
//! is reserved for failures that make the whole run meaningless, such as a
//! browser that cannot be launched at all.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single step or probe.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("navigation to {url} did not settle within {timeout_ms} ms: {reason}")]
    NavigationTimeout {
        url: String,
        timeout_ms: u64,
        reason: String,
    },

    #[error("target '{target}' is not interactable: {reason}")]
    ElementNotInteractable { target: String, reason: String },

    #[error("target '{target}' is not editable: {reason}")]
    ElementNotEditable { target: String, reason: String },

    #[error("target '{target}' not resolved (tried: {})", .candidates_tried.join(", "))]
    TargetNotResolved {
        target: String,
        candidates_tried: Vec<String>,
    },

    #[error("page evaluation failed: {message}")]
    PageEvaluationError { message: String },

    #[error("step exceeded its {timeout_ms} ms deadline{}", deadline_suffix(.run_deadline))]
    StepTimeout { timeout_ms: u64, run_deadline: bool },

    #[error("connection to {url} refused: {message}")]
    ConnectionRefused { url: String, message: String },

    #[error("unexpected status: expected {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    #[error("response body shape mismatch: {reason}")]
    BodyShapeMismatch { reason: String },

    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
}

fn deadline_suffix(run_deadline: &bool) -> &'static str {
    if *run_deadline {
        " (run deadline)"
    } else {
        ""
    }
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            Self::ElementNotInteractable { .. } => ErrorKind::ElementNotInteractable,
            Self::ElementNotEditable { .. } => ErrorKind::ElementNotEditable,
            Self::TargetNotResolved { .. } => ErrorKind::TargetNotResolved,
            Self::PageEvaluationError { .. } => ErrorKind::PageEvaluationError,
            Self::StepTimeout { .. } => ErrorKind::StepTimeout,
            Self::ConnectionRefused { .. } => ErrorKind::ConnectionRefused,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::BodyShapeMismatch { .. } => ErrorKind::BodyShapeMismatch,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Stable, serializable name of an error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationTimeout,
    ElementNotInteractable,
    ElementNotEditable,
    TargetNotResolved,
    PageEvaluationError,
    StepTimeout,
    ConnectionRefused,
    UnexpectedStatus,
    BodyShapeMismatch,
    Timeout,
    HarnessInternalError,
}

/// Error as recorded in a step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StepError> for ErrorInfo {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<StepError> for ErrorInfo {
    fn from(err: StepError) -> Self {
        Self::from(&err)
    }
}

/// Failure that aborts the entire run (exit code 2).
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to launch browser session: {0}")]
    BrowserLaunch(String),

    #[error("scenario registry error: {0}")]
    Registry(String),

    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("scenario task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::HarnessInternalError
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
