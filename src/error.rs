use std::any::Any;
use thiserror::Error;

use crate::notification::LifecycleState;

pub type Result<T> = std::result::Result<T, OrchestraError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestraError {
    #[error("Deferred value already resolved")]
    AlreadyResolved,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state transition for {resource}: {from} -> {to}")]
    InvalidStateTransition {
        resource: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Unresolved reference {reference}: {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("Resource {resource} failed: {reason}")]
    ResourceFailed {
        resource: String,
        /// Resource whose startup was blocked on the failed one.
        waiter: Option<String>,
        reason: String,
    },

    #[error("Circular wait dependency detected: {cycle}")]
    CycleDetected { cycle: String },

    #[error("Resource already registered: {name}")]
    DuplicateResource { name: String },

    #[error("Resource not found: {name}")]
    ResourceNotFound { name: String },

    #[error("Resource {resource} does not have capability {capability}")]
    MissingCapability { resource: String, capability: String },

    #[error("Hook {hook} failed for {resource}: {message}")]
    HookFailed {
        hook: String,
        resource: String,
        message: String,
    },

    #[error("Producer failed: {reason}")]
    ProducerFailed { reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OrchestraError {
    pub fn unresolved(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn resource_failed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceFailed {
            resource: resource.into(),
            waiter: None,
            reason: reason.into(),
        }
    }

    /// Attach the name of the resource that was waiting on the failed one.
    pub fn for_waiter(self, name: &str) -> Self {
        match self {
            Self::ResourceFailed {
                resource, reason, ..
            } => Self::ResourceFailed {
                resource,
                waiter: Some(name.to_string()),
                reason,
            },
            other => other,
        }
    }

    pub fn hook_failed(
        hook: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HookFailed {
            hook: hook.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound { name: name.into() }
    }

    /// Whether the error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
