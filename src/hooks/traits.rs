//! Lifecycle hook trait
//!
//! Hooks provision resources at two points of a run. A hook declares which
//! resources it cares about; the runner starts one task per matching
//! resource.

use async_trait::async_trait;

use super::HookContext;
use crate::resource::ResourceDescriptor;

/// Provisioning logic attached to resources of a run
///
/// Both extension points default to doing nothing, so a hook implements only
/// the one it needs.
///
/// # Example
///
/// ```rust,ignore
/// use hostweave::hooks::{HookContext, LifecycleHook};
/// use async_trait::async_trait;
///
/// struct ModelDownload;
///
/// #[async_trait]
/// impl LifecycleHook for ModelDownload {
///     fn name(&self) -> &str {
///         "model-download"
///     }
///
///     fn applies_to(&self, resource: &ResourceDescriptor) -> bool {
///         resource.parent() == Some("ollama")
///     }
///
///     async fn after_resources_created(&self, ctx: HookContext) -> anyhow::Result<()> {
///         for percent in [0, 25, 50, 75, 100] {
///             ctx.report_progress(percent)?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait LifecycleHook: Send + Sync + 'static {
    /// Name used in logs and task reports.
    fn name(&self) -> &str;

    /// Whether this hook runs for `resource`.
    fn applies_to(&self, resource: &ResourceDescriptor) -> bool;

    /// Runs before any resource starts.
    ///
    /// An error marks the resource `FailedToStart` and keeps it from starting.
    async fn before_start(&self, _ctx: HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs in the background once every resource has been created.
    ///
    /// An error is recorded on the resource but never changes its state.
    async fn after_resources_created(&self, _ctx: HookContext) -> anyhow::Result<()> {
        Ok(())
    }
}
