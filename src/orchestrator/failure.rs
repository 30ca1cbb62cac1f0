use serde::Serialize;
use std::fmt;

use crate::hooks::HookPhase;
use crate::notification::LifecycleState;
use crate::wait::WaitBehavior;

/// Why a resource did not come up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// A wait condition can no longer be satisfied.
    Dependency {
        dependency: String,
        behavior: WaitBehavior,
        reason: String,
    },
    /// A hook task for this resource failed, or was cancelled before start.
    Hook {
        hook: String,
        phase: HookPhase,
        message: String,
    },
    /// The platform or supervisor could not start it.
    Start { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureExplanation {
    pub resource: String,
    pub state: LifecycleState,
    pub cause: FailureCause,
}

impl fmt::Display for FailureExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::Dependency {
                dependency,
                behavior,
                reason,
            } => write!(
                f,
                "{} ({}): waiting for {dependency} ({behavior}) failed: {reason}",
                self.resource, self.state
            ),
            FailureCause::Hook {
                hook,
                phase,
                message,
            } => write!(
                f,
                "{} ({}): hook {hook} failed during {phase}: {message}",
                self.resource, self.state
            ),
            FailureCause::Start { message } => {
                write!(f, "{} ({}): {message}", self.resource, self.state)
            }
        }
    }
}
