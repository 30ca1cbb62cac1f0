use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

/// Extension point a hook task runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookPhase {
    BeforeStart,
    AfterResourcesCreated,
}

/// `Pending → Running → {Succeeded | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HookTaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl HookTaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Record of one hook running for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookTaskReport {
    pub id: Uuid,
    pub hook: String,
    pub resource: String,
    pub phase: HookPhase,
    pub state: HookTaskState,
    /// Error text for failed tasks.
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HookTaskReport {
    pub(crate) fn pending(hook: &str, resource: &str, phase: HookPhase) -> Self {
        Self {
            id: Uuid::new_v4(),
            hook: hook.to_string(),
            resource: resource.to_string(),
            phase,
            state: HookTaskState::Pending,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.state = HookTaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, state: HookTaskState, message: Option<String>) {
        self.state = state;
        self.message = message;
        self.finished_at = Some(Utc::now());
    }
}
