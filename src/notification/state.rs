use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::Display;

/// Lifecycle state of one resource
///
/// `NotStarted → Pending → Starting → Running → {Healthy | Unhealthy} → Exited(code)`
/// with `FailedToStart` as a parallel terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    NotStarted,
    /// Declared and blocked on wait conditions; not consuming startup resources.
    Pending,
    Starting,
    Running,
    Healthy,
    Unhealthy,
    Exited(i32),
    FailedToStart,
}

impl LifecycleState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::FailedToStart)
    }

    /// Check if the resource process is alive
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Running | Self::Healthy | Self::Unhealthy)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Pending => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Healthy | Self::Unhealthy => 4,
            Self::Exited(_) | Self::FailedToStart => 5,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Moves go forward only, except that a live resource may oscillate
    /// between `Running`, `Healthy` and `Unhealthy`. Terminal states accept
    /// nothing but themselves.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if self.is_alive() && next.is_alive() {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::FailedToStart => write!(f, "failed_to_start"),
        }
    }
}

/// Presentation hint attached to a snapshot's state text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateStyle {
    #[default]
    Info,
    Success,
    Warn,
    Error,
}

/// Current observable state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resource: String,
    pub state: LifecycleState,
    pub state_text: Option<String>,
    pub style: StateStyle,
    pub exit_code: Option<i32>,
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Incremented on every accepted change.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub(crate) fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            state: LifecycleState::NotStarted,
            state_text: None,
            style: StateStyle::Info,
            exit_code: None,
            properties: BTreeMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Equality ignoring bookkeeping fields.
    pub fn same_content(&self, other: &ResourceSnapshot) -> bool {
        self.state == other.state
            && self.state_text == other.state_text
            && self.style == other.style
            && self.exit_code == other.exit_code
            && self.properties == other.properties
    }
}

/// One accepted update, as seen on the change stream
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub resource: String,
    pub previous: LifecycleState,
    pub snapshot: ResourceSnapshot,
}

impl StateChange {
    pub fn is_state_transition(&self) -> bool {
        self.previous != self.snapshot.state
    }
}
