use serde::{Deserialize, Serialize};
use std::fmt;

use crate::notification::{ExitRequirement, StateTarget};

/// What a waiting resource requires of its dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitBehavior {
    Running,
    Healthy,
    /// One-shot dependency finished with an accepted exit code.
    Completion(ExitRequirement),
}

impl WaitBehavior {
    pub fn target(&self) -> StateTarget {
        match self {
            Self::Running => StateTarget::Running,
            Self::Healthy => StateTarget::Healthy,
            Self::Completion(exit) => StateTarget::Exited(*exit),
        }
    }
}

impl fmt::Display for WaitBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Healthy => write!(f, "healthy"),
            Self::Completion(exit) => write!(f, "completion with {exit}"),
        }
    }
}

/// A declared dependency of one resource's startup on another resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitCondition {
    pub dependency: String,
    pub behavior: WaitBehavior,
}

impl WaitCondition {
    pub fn new(dependency: impl Into<String>, behavior: WaitBehavior) -> Self {
        Self {
            dependency: dependency.into(),
            behavior,
        }
    }
}
