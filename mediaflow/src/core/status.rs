//! Pipeline stage enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One discrete phase of the pipeline.
///
/// Stages run strictly in declaration order for a given unit of work:
/// `Transform` first, then `Ship`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Watermark the uploaded source image.
    Transform,
    /// Upload the produced artifact to the receiving service.
    Ship,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Self; 2] = [Self::Transform, Self::Ship];

    /// Returns the stage that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Transform => Some(Self::Ship),
            Self::Ship => None,
        }
    }

    /// Returns true if this is the final stage of the pipeline.
    #[must_use]
    pub const fn is_last(self) -> bool {
        self.next().is_none()
    }

    /// Returns the lowercase name used in logs and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Ship => "ship",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transform" => Ok(Self::Transform),
            "ship" => Ok(Self::Ship),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}
