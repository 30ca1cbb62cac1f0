use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::notification::{ResourceNotificationService, StateStyle};
use crate::resource::ResourceDescriptor;

/// Snapshot property holding the last reported progress percentage.
pub const PROGRESS_PROPERTY: &str = "progress";

/// What one hook task may see and do
///
/// Progress and status text go through the notification service so every
/// observer sees the same thing. The context is cheap to clone.
#[derive(Clone)]
pub struct HookContext {
    hook: String,
    resource: Arc<ResourceDescriptor>,
    cancel: CancellationToken,
    notifications: ResourceNotificationService,
    last_progress: Arc<Mutex<Option<u8>>>,
}

impl HookContext {
    pub(crate) fn new(
        hook: &str,
        resource: Arc<ResourceDescriptor>,
        cancel: CancellationToken,
        notifications: ResourceNotificationService,
    ) -> Self {
        Self {
            hook: hook.to_string(),
            resource,
            cancel,
            notifications,
            last_progress: Arc::new(Mutex::new(None)),
        }
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn resource(&self) -> &Arc<ResourceDescriptor> {
        &self.resource
    }

    /// Cancelled when the task is cancelled or the run shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn notifications(&self) -> &ResourceNotificationService {
        &self.notifications
    }

    /// Report progress as a percentage, clamped to 100.
    ///
    /// Repeating the last reported value publishes nothing and returns
    /// `Ok(false)`.
    pub fn report_progress(&self, percent: u8) -> Result<bool> {
        let percent = percent.min(100);
        let mut last = self
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *last == Some(percent) {
            return Ok(false);
        }

        let text = format!("{}: {percent}%", self.hook);
        let changed = self.notifications.publish_update(self.resource.name(), |snapshot| {
            snapshot.state_text = Some(text);
            snapshot.style = StateStyle::Info;
            snapshot
                .properties
                .insert(PROGRESS_PROPERTY.to_string(), serde_json::Value::from(percent));
        })?;
        *last = Some(percent);
        tracing::debug!(hook = %self.hook, resource = %self.resource.name(), percent, "Progress");
        Ok(changed)
    }

    /// Replace the resource's status text without touching its state.
    pub fn set_text(&self, text: impl Into<String>, style: StateStyle) -> Result<bool> {
        let text = text.into();
        self.notifications.publish_update(self.resource.name(), |snapshot| {
            snapshot.state_text = Some(text);
            snapshot.style = style;
        })
    }

    pub fn set_property(&self, key: &str, value: impl Into<serde_json::Value>) -> Result<bool> {
        let value = value.into();
        self.notifications.publish_update(self.resource.name(), |snapshot| {
            snapshot.properties.insert(key.to_string(), value);
        })
    }
}
