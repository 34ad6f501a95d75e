//! Stage outcome type returned by executors.

use super::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or service unavailability; may succeed later.
    Transient,
    /// Invalid input or irrecoverable application error.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// The result of one stage execution, returned by value.
///
/// A crash has no variant here: a worker that dies never returns anything,
/// and the queue infers the crash from lease expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The stage finished; carries the next stage's payload when there is one.
    Success {
        /// Payload for the following stage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<Payload>,
    },
    /// The stage failed for a reason that may clear up on its own.
    TransientFailure {
        /// Classified reason.
        reason: String,
    },
    /// The stage failed and retrying will not help.
    PermanentFailure {
        /// Classified reason.
        reason: String,
    },
}

impl Outcome {
    /// Creates a success outcome with no follow-up payload.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success { next: None }
    }

    /// Creates a success outcome that hands `next` to the following stage.
    #[must_use]
    pub const fn success_with(next: Payload) -> Self {
        Self::Success { next: Some(next) }
    }

    /// Creates a transient failure.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
        }
    }

    /// Creates a permanent failure.
    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            reason: reason.into(),
        }
    }

    /// Returns true for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the failure classification, or `None` on success.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::TransientFailure { .. } => Some(FailureKind::Transient),
            Self::PermanentFailure { .. } => Some(FailureKind::Permanent),
        }
    }

    /// Returns the failure reason, or `None` on success.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::TransientFailure { reason } | Self::PermanentFailure { reason } => Some(reason),
        }
    }

    /// Returns the short status label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::TransientFailure { .. } => "transient_failure",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.label(), reason),
            None => f.write_str(self.label()),
        }
    }
}
