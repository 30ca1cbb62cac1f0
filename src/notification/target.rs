use serde::{Deserialize, Serialize};
use std::fmt;

use super::{LifecycleState, ResourceSnapshot};

/// Exit codes a completion wait accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitRequirement {
    #[default]
    Success,
    Any,
    Code(i32),
}

impl ExitRequirement {
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Success => code == 0,
            Self::Any => true,
            Self::Code(expected) => *expected == code,
        }
    }
}

impl fmt::Display for ExitRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exit code 0"),
            Self::Any => write!(f, "any exit code"),
            Self::Code(code) => write!(f, "exit code {code}"),
        }
    }
}

/// State a waiter is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTarget {
    /// Reached `Running` or any later live state.
    Running,
    /// Currently `Healthy`.
    Healthy,
    Exited(ExitRequirement),
    /// Exactly this state.
    Exact(LifecycleState),
}

/// Outcome of checking one snapshot against a [`StateTarget`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCheck {
    Satisfied,
    Pending,
    /// The resource can never reach the target from here.
    Unreachable(String),
}

impl StateTarget {
    pub fn check(&self, snapshot: &ResourceSnapshot) -> TargetCheck {
        let state = snapshot.state;
        match (self, state) {
            (Self::Exact(target), current) if *target == current => TargetCheck::Satisfied,
            (_, LifecycleState::FailedToStart) => TargetCheck::Unreachable(
                snapshot
                    .state_text
                    .clone()
                    .unwrap_or_else(|| "failed to start".to_string()),
            ),
            (Self::Exact(target), current) if !current.can_transition_to(*target) => {
                TargetCheck::Unreachable(format!("already {current}"))
            }
            (Self::Running, current) if current.is_alive() => TargetCheck::Satisfied,
            (Self::Healthy, LifecycleState::Healthy) => TargetCheck::Satisfied,
            (Self::Exited(requirement), LifecycleState::Exited(code)) => {
                if requirement.accepts(code) {
                    TargetCheck::Satisfied
                } else {
                    TargetCheck::Unreachable(format!(
                        "exited with code {code}, expected {requirement}"
                    ))
                }
            }
            (_, LifecycleState::Exited(code)) => {
                TargetCheck::Unreachable(format!("exited with code {code}"))
            }
            _ => TargetCheck::Pending,
        }
    }
}

impl fmt::Display for StateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Healthy => write!(f, "healthy"),
            Self::Exited(requirement) => write!(f, "exited with {requirement}"),
            Self::Exact(state) => write!(f, "{state}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: LifecycleState) -> ResourceSnapshot {
        let mut snapshot = ResourceSnapshot::new("x");
        snapshot.state = state;
        snapshot
    }

    #[test]
    fn test_running_target() {
        assert_eq!(StateTarget::Running.check(&snapshot(LifecycleState::Starting)), TargetCheck::Pending);
        assert_eq!(StateTarget::Running.check(&snapshot(LifecycleState::Unhealthy)), TargetCheck::Satisfied);
        assert!(matches!(
            StateTarget::Running.check(&snapshot(LifecycleState::Exited(0))),
            TargetCheck::Unreachable(_)
        ));
    }

    #[test]
    fn test_healthy_target_ignores_earlier_states() {
        for state in [LifecycleState::Starting, LifecycleState::Running, LifecycleState::Unhealthy] {
            assert_eq!(StateTarget::Healthy.check(&snapshot(state)), TargetCheck::Pending);
        }
        assert_eq!(StateTarget::Healthy.check(&snapshot(LifecycleState::Healthy)), TargetCheck::Satisfied);
    }

    #[test]
    fn test_exit_targets() {
        let success = StateTarget::Exited(ExitRequirement::Success);
        assert_eq!(success.check(&snapshot(LifecycleState::Exited(0))), TargetCheck::Satisfied);
        assert!(matches!(
            success.check(&snapshot(LifecycleState::Exited(1))),
            TargetCheck::Unreachable(_)
        ));
        let any = StateTarget::Exited(ExitRequirement::Any);
        assert_eq!(any.check(&snapshot(LifecycleState::Exited(7))), TargetCheck::Satisfied);
        assert_eq!(any.check(&snapshot(LifecycleState::Running)), TargetCheck::Pending);
    }

    #[test]
    fn test_failed_to_start_is_unreachable_unless_targeted() {
        let failed = snapshot(LifecycleState::FailedToStart);
        assert!(matches!(StateTarget::Healthy.check(&failed), TargetCheck::Unreachable(_)));
        assert_eq!(
            StateTarget::Exact(LifecycleState::FailedToStart).check(&failed),
            TargetCheck::Satisfied
        );
    }
}
