//! Startup gating on declared wait conditions
//!
//! Every resource may declare wait conditions on other resources ("healthy",
//! "running", or "completed with exit code 0"). The process supervisor calls
//! [`WaitResolver::resolve`] before starting a resource; the call returns only
//! when every condition holds, and fails as soon as any of them becomes
//! impossible.
//!
//! Cycles among wait conditions are rejected earlier, when the graph is
//! built, so resolution never deadlocks on a cycle.

mod condition;

pub use condition::{WaitBehavior, WaitCondition};

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};
use crate::graph::ResourceGraph;
use crate::notification::{LifecycleState, ResourceNotificationService, TargetCheck};

/// Blocks a resource's start until its wait conditions are satisfied
#[derive(Clone)]
pub struct WaitResolver {
    graph: ResourceGraph,
    notifications: ResourceNotificationService,
}

impl WaitResolver {
    pub fn new(graph: ResourceGraph, notifications: ResourceNotificationService) -> Self {
        Self {
            graph,
            notifications,
        }
    }

    /// Wait until every condition of `name` is satisfied.
    ///
    /// While waiting the resource is held in [`LifecycleState::Pending`].
    /// Conditions are awaited concurrently; the first dependency that can no
    /// longer satisfy its condition fails the call with
    /// [`OrchestraError::ResourceFailed`]
    /// naming both the dependency and `name`.
    pub async fn resolve(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let resource = self.graph.get(name)?;
        let conditions = resource.wait_conditions();
        if conditions.is_empty() {
            return Ok(());
        }

        if self.notifications.state(name)? == LifecycleState::NotStarted {
            self.notifications
                .update_state(name, LifecycleState::Pending)?;
        }
        tracing::info!(resource = %name, conditions = conditions.len(), "Waiting for dependencies");

        let waits = conditions.iter().map(|condition| async move {
            self.notifications
                .wait_for_state(&condition.dependency, condition.behavior.target(), cancel)
                .await
                .map_err(|e| {
                    tracing::warn!(
                        resource = %name,
                        dependency = %condition.dependency,
                        error = %e,
                        "Wait condition failed"
                    );
                    e.for_waiter(name)
                })?;
            tracing::debug!(
                resource = %name,
                dependency = %condition.dependency,
                behavior = %condition.behavior,
                "Wait condition satisfied"
            );
            Ok::<(), OrchestraError>(())
        });
        try_join_all(waits).await?;

        tracing::info!(resource = %name, "Dependencies satisfied");
        Ok(())
    }

    /// Conditions of `name` that do not currently hold.
    pub fn unsatisfied(&self, name: &str) -> Result<Vec<WaitCondition>> {
        let resource = self.graph.get(name)?;
        let mut pending = Vec::new();
        for condition in resource.wait_conditions() {
            let snapshot = self.notifications.snapshot(&condition.dependency)?;
            if condition.behavior.target().check(&snapshot) != TargetCheck::Satisfied {
                pending.push(condition.clone());
            }
        }
        Ok(pending)
    }

    /// First condition of `name` that can no longer be satisfied, with the reason.
    pub fn failed_condition(&self, name: &str) -> Result<Option<(WaitCondition, String)>> {
        let resource = self.graph.get(name)?;
        for condition in resource.wait_conditions() {
            let snapshot = self.notifications.snapshot(&condition.dependency)?;
            if let TargetCheck::Unreachable(reason) = condition.behavior.target().check(&snapshot) {
                return Ok(Some((condition.clone(), reason)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::notification::ExitRequirement;
    use crate::resource::{Capability, ResourceDescriptor, ResourceKind};
    use std::time::Duration;

    fn setup() -> (WaitResolver, ResourceNotificationService) {
        let mut builder = GraphBuilder::new();
        for name in ["db", "cache", "migrate", "api"] {
            builder
                .add(ResourceDescriptor::new(name, ResourceKind::Container, [Capability::SupportsWaiting]))
                .unwrap();
        }
        builder.wait_for("api", "db").unwrap();
        builder.wait_for_start("api", "cache").unwrap();
        builder
            .wait_for_completion("api", "migrate", ExitRequirement::Success)
            .unwrap();
        let graph = builder.build().unwrap();
        let notifications = ResourceNotificationService::for_graph(&graph, 64);
        (WaitResolver::new(graph, notifications.clone()), notifications)
    }

    #[tokio::test]
    async fn test_resource_without_conditions_resolves_immediately() {
        let (resolver, notifications) = setup();
        resolver.resolve("db", &CancellationToken::new()).await.unwrap();
        assert_eq!(notifications.state("db").unwrap(), LifecycleState::NotStarted);
    }

    #[tokio::test]
    async fn test_resolves_after_all_conditions() {
        let (resolver, notifications) = setup();
        let resolving = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve("api", &CancellationToken::new()).await })
        };

        notifications.update_state("db", LifecycleState::Healthy).unwrap();
        notifications.update_state("cache", LifecycleState::Running).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!resolving.is_finished());
        assert_eq!(notifications.state("api").unwrap(), LifecycleState::Pending);
        assert_eq!(resolver.unsatisfied("api").unwrap().len(), 1);

        notifications.update_state("migrate", LifecycleState::Exited(0)).unwrap();
        resolving.await.unwrap().unwrap();
        assert!(resolver.unsatisfied("api").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_circuits_on_failed_dependency() {
        let (resolver, notifications) = setup();
        let resolving = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve("api", &CancellationToken::new()).await })
        };

        notifications
            .update_state("cache", LifecycleState::FailedToStart)
            .unwrap();
        let err = resolving.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::ResourceFailed { ref resource, ref waiter, .. }
                if resource == "cache" && waiter.as_deref() == Some("api")
        ));

        let (condition, _) = resolver.failed_condition("api").unwrap().unwrap();
        assert_eq!(condition.dependency, "cache");
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let (resolver, _) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            resolver.resolve("api", &cancel).await,
            Err(OrchestraError::Cancelled)
        );
    }
}
