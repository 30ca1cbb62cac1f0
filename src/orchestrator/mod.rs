//! One orchestration run over a frozen resource graph
//!
//! ```text
//! BeforeStartEvent
//!   → before_start hooks (failures exclude their resource)
//!   → endpoint allocation → ResourceEndpointsAllocatedEvent
//!   → connection strings, per resource in the background → ConnectionStringAvailableEvent
//!   → AfterResourcesCreatedEvent, after_resources_created hooks (background)
//!   → per resource, concurrently:
//!        WaitResolver::resolve → BeforeResourceStartedEvent → ProcessSupervisor::start
//!        → ResourceReadyEvent once running (or healthy, with a health check)
//! ```
//!
//! Failures stay with the resource that caused them and the resources that
//! wait on it. The run itself only fails on lookup errors in its own graph.

mod failure;
mod platform;

pub use failure::{FailureCause, FailureExplanation};
pub use platform::{LocalhostAllocator, PlatformAllocator, ProcessSupervisor};

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::eventing::{
    AfterResourcesCreatedEvent, BeforeResourceStartedEvent, BeforeStartEvent,
    ConnectionStringAvailableEvent, Event, EventBus, ResourceEndpointsAllocatedEvent,
    ResourceReadyEvent,
};
use crate::graph::ResourceGraph;
use crate::hooks::{HookPhase, HookTaskState, LifecycleHook, LifecycleHookRunner};
use crate::notification::{LifecycleState, ResourceNotificationService, StateStyle, StateTarget};
use crate::resource::{AnnotationKind, ResourceDescriptor};
use crate::wait::WaitResolver;

/// How each resource ended up after [`Orchestrator::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Handed to the process supervisor.
    pub started: Vec<String>,
    /// `FailedToStart` because of a hook, endpoint allocation or the supervisor.
    pub failed: Vec<String>,
    /// Held back because a wait condition became unsatisfiable.
    pub blocked: Vec<String>,
    pub cancelled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOutcome {
    Started,
    Failed,
    Blocked,
    Cancelled,
}

/// Wires the core components together for one run
pub struct Orchestrator {
    graph: ResourceGraph,
    config: OrchestratorConfig,
    bus: EventBus,
    notifications: ResourceNotificationService,
    hooks: LifecycleHookRunner,
    resolver: WaitResolver,
    allocator: Arc<dyn PlatformAllocator>,
    supervisor: Arc<dyn ProcessSupervisor>,
    watchers: tokio::sync::Mutex<JoinSet<()>>,
}

impl Orchestrator {
    pub fn new<A, S>(graph: ResourceGraph, config: OrchestratorConfig, allocator: A, supervisor: S) -> Self
    where
        A: PlatformAllocator + 'static,
        S: ProcessSupervisor + 'static,
    {
        let notifications = ResourceNotificationService::for_graph(&graph, config.event_channel_capacity);
        let hooks = LifecycleHookRunner::new(notifications.clone(), config.clone());
        let resolver = WaitResolver::new(graph.clone(), notifications.clone());
        Self {
            graph,
            config,
            bus: EventBus::new(),
            notifications,
            hooks,
            resolver,
            allocator: Arc::new(allocator),
            supervisor: Arc::new(supervisor),
            watchers: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_hook<H: LifecycleHook>(mut self, hook: H) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn notifications(&self) -> &ResourceNotificationService {
        &self.notifications
    }

    pub fn hooks(&self) -> &LifecycleHookRunner {
        &self.hooks
    }

    pub fn resolver(&self) -> &WaitResolver {
        &self.resolver
    }

    /// Bring every resource up, as far as its dependencies allow.
    pub async fn run(&self) -> Result<RunReport> {
        let cancel = self.hooks.cancellation().clone();
        tracing::info!(
            resources = self.graph.len(),
            mode = %self.config.execution_mode,
            "Starting orchestration"
        );

        self.publish(BeforeStartEvent { graph: self.graph.clone() }, &cancel)
            .await;
        let mut excluded = self.hooks.run_before_start(&self.graph).await;

        self.allocate_endpoints(&mut excluded, &cancel).await;
        self.watch_connection_strings(&excluded, &cancel).await;

        self.publish(AfterResourcesCreatedEvent { graph: self.graph.clone() }, &cancel)
            .await;
        self.hooks.start_after_resources_created(&self.graph).await;

        let mut report = RunReport::default();
        for name in &excluded {
            let reports = self.hooks.reports_for(name);
            let before_start = |state| {
                reports
                    .iter()
                    .any(|r| r.phase == HookPhase::BeforeStart && r.state == state)
            };
            let failed = before_start(HookTaskState::Failed)
                || (!before_start(HookTaskState::Cancelled)
                    && self.notifications.state(name)? == LifecycleState::FailedToStart);
            if failed {
                report.failed.push(name.clone());
            } else {
                report.cancelled.push(name.clone());
            }
        }

        if self.config.is_publish_mode() {
            tracing::info!("Publish mode, not starting resources");
            return Ok(report);
        }

        let starts = self
            .graph
            .resources()
            .filter(|r| !excluded.contains(r.name()))
            .map(|r| self.start_resource(Arc::clone(r), &cancel));
        for (name, outcome) in join_all(starts).await {
            match outcome {
                StartOutcome::Started => report.started.push(name),
                StartOutcome::Failed => report.failed.push(name),
                StartOutcome::Blocked => report.blocked.push(name),
                StartOutcome::Cancelled => report.cancelled.push(name),
            }
        }
        report.failed.sort();

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            "Orchestration started"
        );
        Ok(report)
    }

    async fn allocate_endpoints(&self, excluded: &mut BTreeSet<String>, cancel: &CancellationToken) {
        for resource in self.graph.resources() {
            if resource.endpoints().next().is_none() {
                continue;
            }
            if excluded.contains(resource.name()) {
                fail_endpoints(resource, "resource was excluded from startup");
                continue;
            }

            if let Err(e) = self.allocator.allocate(resource, cancel).await {
                let reason = format!("endpoint allocation failed: {e:#}");
                fail_endpoints(resource, &reason);
                self.fail_resource(resource.name(), reason);
                excluded.insert(resource.name().to_string());
                continue;
            }
            self.publish(
                ResourceEndpointsAllocatedEvent {
                    resource: Arc::clone(resource),
                },
                cancel,
            )
            .await;
        }
    }

    /// Evaluate each connection string in the background and announce it once
    /// every value it references is known. Resources start without waiting on it.
    async fn watch_connection_strings(&self, excluded: &BTreeSet<String>, cancel: &CancellationToken) {
        let mut watchers = self.watchers.lock().await;
        for resource in self
            .graph
            .resources()
            .filter(|r| !excluded.contains(r.name()) && r.connection_string_expression().is_ok())
        {
            let resource = Arc::clone(resource);
            let bus = self.bus.clone();
            let cancel = cancel.clone();
            watchers.spawn(async move {
                match resource.connection_string(&cancel).await {
                    Ok(connection_string) => {
                        let report = bus
                            .publish(
                                ConnectionStringAvailableEvent {
                                    resource: Arc::clone(&resource),
                                    connection_string,
                                },
                                &cancel,
                            )
                            .await;
                        if !report.is_clean() {
                            tracing::warn!(
                                resource = %resource.name(),
                                faults = report.faults.len(),
                                "Connection string handlers failed"
                            );
                        }
                    }
                    Err(_) if cancel.is_cancelled() => {}
                    Err(e) => tracing::warn!(
                        resource = %resource.name(),
                        error = %e,
                        "Connection string unavailable"
                    ),
                }
            });
        }
    }

    async fn start_resource(
        &self,
        resource: Arc<ResourceDescriptor>,
        cancel: &CancellationToken,
    ) -> (String, StartOutcome) {
        let name = resource.name().to_string();
        let span = tracing::info_span!("resource", resource = %name);

        let outcome = async {
            if let Err(e) = self.resolver.resolve(&name, cancel).await {
                if e.is_cancelled() {
                    return StartOutcome::Cancelled;
                }
                // Stays Pending; the text says why.
                let text = format!("blocked: {e}");
                if let Err(e) = self.notifications.publish_update(&name, |s| {
                    s.state_text = Some(text);
                    s.style = StateStyle::Error;
                }) {
                    tracing::warn!(error = %e, "Could not record blocked resource");
                }
                return StartOutcome::Blocked;
            }

            self.publish(
                BeforeResourceStartedEvent {
                    resource: Arc::clone(&resource),
                },
                cancel,
            )
            .await;

            let started = self
                .supervisor
                .start(Arc::clone(&resource), self.notifications.clone(), cancel.clone())
                .await;
            if let Err(e) = started {
                self.fail_resource(&name, format!("start failed: {e:#}"));
                return StartOutcome::Failed;
            }

            self.watch_ready(resource, cancel).await;
            StartOutcome::Started
        }
        .instrument(span)
        .await;
        (name, outcome)
    }

    /// Publish `ResourceReadyEvent` once the resource is running, or healthy
    /// if it declares a health check.
    async fn watch_ready(&self, resource: Arc<ResourceDescriptor>, cancel: &CancellationToken) {
        let target = if resource.annotation(AnnotationKind::HealthCheck).is_some() {
            StateTarget::Healthy
        } else {
            StateTarget::Running
        };
        let notifications = self.notifications.clone();
        let bus = self.bus.clone();
        let cancel = cancel.clone();

        self.watchers.lock().await.spawn(async move {
            match notifications.wait_for_state(resource.name(), target, &cancel).await {
                Ok(snapshot) => {
                    tracing::info!(resource = %resource.name(), state = %snapshot.state, "Resource ready");
                    bus.publish(ResourceReadyEvent { resource, snapshot }, &cancel)
                        .await;
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::warn!(resource = %resource.name(), error = %e, "Resource never became ready")
                }
            }
        });
    }

    /// Cancel every hook task and readiness watcher and wait for them,
    /// bounded by the shutdown timeout.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestration");
        self.hooks.shutdown().await;

        let mut watchers = self.watchers.lock().await;
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while watchers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            watchers.abort_all();
        }
        tracing::info!("Orchestration stopped");
    }

    /// Which dependency or hook kept `name` from coming up, if anything did.
    pub fn explain_failure(&self, name: &str) -> Result<Option<FailureExplanation>> {
        let snapshot = self.notifications.snapshot(name)?;
        let reports = self.hooks.reports_for(name);
        let explain = |cause| {
            Some(FailureExplanation {
                resource: name.to_string(),
                state: snapshot.state,
                cause,
            })
        };
        let hook_failure = |phase: Option<HookPhase>| {
            reports
                .iter()
                .find(|r| match phase {
                    // A cancelled setup task also keeps the resource down.
                    Some(HookPhase::BeforeStart) => {
                        r.phase == HookPhase::BeforeStart
                            && matches!(r.state, HookTaskState::Failed | HookTaskState::Cancelled)
                    }
                    _ => r.state == HookTaskState::Failed && phase.is_none_or(|p| r.phase == p),
                })
                .map(|r| FailureCause::Hook {
                    hook: r.hook.clone(),
                    phase: r.phase,
                    message: r.message.clone().unwrap_or_default(),
                })
        };

        if let Some(cause) = hook_failure(Some(HookPhase::BeforeStart)) {
            return Ok(explain(cause));
        }
        if let Some((condition, reason)) = self.resolver.failed_condition(name)? {
            return Ok(explain(FailureCause::Dependency {
                dependency: condition.dependency,
                behavior: condition.behavior,
                reason,
            }));
        }
        if snapshot.state == LifecycleState::FailedToStart {
            let message = snapshot
                .state_text
                .clone()
                .unwrap_or_else(|| "failed to start".to_string());
            return Ok(explain(FailureCause::Start { message }));
        }
        Ok(hook_failure(None).and_then(explain))
    }

    async fn publish<E: Event>(&self, event: E, cancel: &CancellationToken) {
        let report = self.bus.publish(event, cancel).await;
        if !report.is_clean() {
            tracing::warn!(
                event = std::any::type_name::<E>(),
                faults = report.faults.len(),
                "Event handlers failed"
            );
        }
    }

    fn fail_resource(&self, name: &str, reason: String) {
        tracing::error!(resource = %name, reason = %reason, "Resource failed to start");
        if let Err(e) = self.notifications.update_state_with_text(
            name,
            LifecycleState::FailedToStart,
            reason,
            StateStyle::Error,
        ) {
            tracing::warn!(resource = %name, error = %e, "Could not mark resource failed");
        }
    }
}

/// Fail every unallocated endpoint so expressions referencing them stop waiting.
fn fail_endpoints(resource: &ResourceDescriptor, reason: &str) {
    for endpoint in resource.endpoints().filter(|e| !e.is_allocated()) {
        if let Err(e) = endpoint.allocated().fail(reason) {
            tracing::debug!(resource = %resource.name(), error = %e, "Endpoint already settled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::deferred::DeferredValue;
    use crate::expression::Expression;
    use crate::hooks::HookContext;
    use crate::notification::ExitRequirement;
    use crate::resource::{Capability, ResourceKind};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Moves every resource to `Running`, except `migrate`, which exits with 1.
    struct Supervisor;

    #[async_trait]
    impl ProcessSupervisor for Supervisor {
        async fn start(
            &self,
            resource: Arc<ResourceDescriptor>,
            notifications: ResourceNotificationService,
            _cancel: CancellationToken,
        ) -> anyhow::Result<()> {
            notifications.update_state(resource.name(), LifecycleState::Starting)?;
            if resource.name() == "migrate" {
                notifications.update_state(resource.name(), LifecycleState::Exited(1))?;
            } else {
                notifications.update_state(resource.name(), LifecycleState::Running)?;
            }
            Ok(())
        }
    }

    struct FailingInstall;

    #[async_trait]
    impl LifecycleHook for FailingInstall {
        fn name(&self) -> &str {
            "bun-install"
        }

        fn applies_to(&self, resource: &ResourceDescriptor) -> bool {
            resource.name() == "web"
        }

        async fn before_start(&self, _ctx: HookContext) -> anyhow::Result<()> {
            anyhow::bail!("lockfile missing")
        }
    }

    fn graph() -> ResourceGraph {
        let mut builder = ResourceGraph::builder();
        for name in ["migrate", "api", "web", "worker"] {
            builder
                .add(ResourceDescriptor::new(name, ResourceKind::Executable, [Capability::SupportsWaiting]))
                .unwrap();
        }
        builder
            .wait_for_completion("api", "migrate", ExitRequirement::Success)
            .unwrap()
            .wait_for_start("worker", "web")
            .unwrap();
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_failures_are_contained_and_explained() {
        let orchestrator =
            Orchestrator::new(graph(), OrchestratorConfig::default(), LocalhostAllocator::default(), Supervisor)
                .with_hook(FailingInstall);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.started, vec!["migrate"]);
        assert_eq!(report.failed, vec!["web"]);
        let mut blocked = report.blocked.clone();
        blocked.sort();
        assert_eq!(blocked, vec!["api", "worker"]);

        let notifications = orchestrator.notifications();
        assert_eq!(notifications.state("api").unwrap(), LifecycleState::Pending);
        assert_eq!(notifications.state("web").unwrap(), LifecycleState::FailedToStart);

        let api = orchestrator.explain_failure("api").unwrap().unwrap();
        assert!(matches!(
            api.cause,
            FailureCause::Dependency { ref dependency, .. } if dependency == "migrate"
        ));
        let web = orchestrator.explain_failure("web").unwrap().unwrap();
        assert!(matches!(
            web.cause,
            FailureCause::Hook { ref hook, phase: HookPhase::BeforeStart, .. } if hook == "bun-install"
        ));
        assert!(web.to_string().contains("lockfile missing"));
        assert!(orchestrator.explain_failure("migrate").unwrap().is_none());

        orchestrator.shutdown().await;
    }

    /// Holds `before_start` open until cancelled.
    struct Provision;

    #[async_trait]
    impl LifecycleHook for Provision {
        fn name(&self) -> &str {
            "provision"
        }

        fn applies_to(&self, resource: &ResourceDescriptor) -> bool {
            resource.name() == "dep"
        }

        async fn before_start(&self, ctx: HookContext) -> anyhow::Result<()> {
            ctx.cancellation().cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_setup_releases_waiters() {
        let mut builder = ResourceGraph::builder();
        for name in ["dep", "app"] {
            builder
                .add(ResourceDescriptor::new(name, ResourceKind::Container, [Capability::SupportsWaiting]))
                .unwrap();
        }
        builder.wait_for_start("app", "dep").unwrap();
        let orchestrator = Orchestrator::new(
            builder.build().unwrap(),
            OrchestratorConfig::default(),
            LocalhostAllocator::default(),
            Supervisor,
        )
        .with_hook(Provision);

        let (report, cancelled) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(2), orchestrator.run()),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                orchestrator.hooks().cancel_resource("dep")
            }
        );
        assert_eq!(cancelled, 1);
        let report = report.expect("run should finish once setup is cancelled").unwrap();
        assert_eq!(report.cancelled, vec!["dep"]);
        assert_eq!(report.blocked, vec!["app"]);
        assert!(report.started.is_empty());

        let notifications = orchestrator.notifications();
        assert_eq!(notifications.state("dep").unwrap(), LifecycleState::FailedToStart);
        assert_eq!(notifications.state("app").unwrap(), LifecycleState::Pending);

        let app = orchestrator.explain_failure("app").unwrap().unwrap();
        assert!(matches!(
            app.cause,
            FailureCause::Dependency { ref dependency, .. } if dependency == "dep"
        ));
        let dep = orchestrator.explain_failure("dep").unwrap().unwrap();
        assert!(matches!(
            dep.cause,
            FailureCause::Hook { ref hook, phase: HookPhase::BeforeStart, .. } if hook == "provision"
        ));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_string_does_not_gate_startup() {
        let token = DeferredValue::<String>::new("vault.token");
        let mut builder = ResourceGraph::builder();
        builder
            .add(ResourceDescriptor::new(
                "vault",
                ResourceKind::Container,
                [Capability::HasConnectionString],
            ))
            .unwrap();
        builder
            .add(ResourceDescriptor::new("app", ResourceKind::Project, [Capability::SupportsWaiting]))
            .unwrap();
        builder
            .with_connection_string(
                "vault",
                Expression::builder().literal("token=").value(token.clone()).build(),
            )
            .unwrap();
        let orchestrator = Orchestrator::new(
            builder.build().unwrap(),
            OrchestratorConfig::default().shutdown_timeout(Duration::from_secs(1)),
            LocalhostAllocator::default(),
            Supervisor,
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        orchestrator
            .events()
            .subscribe_resource::<ConnectionStringAvailableEvent, _, _>("vault", move |event, _| {
                let tx = tx.clone();
                async move {
                    tx.send(event.connection_string.clone())?;
                    Ok(())
                }
            });

        let report = tokio::time::timeout(Duration::from_secs(1), orchestrator.run())
            .await
            .expect("run should not wait for the connection string")
            .unwrap();
        let mut started = report.started.clone();
        started.sort();
        assert_eq!(started, vec!["app", "vault"]);
        assert!(rx.try_recv().is_err());

        token.resolve("s3cr3t".to_string()).unwrap();
        let connection = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connection, "token=s3cr3t");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_mode_starts_nothing() {
        let config = OrchestratorConfig::default().execution_mode(ExecutionMode::Publish);
        let orchestrator =
            Orchestrator::new(graph(), config, LocalhostAllocator::default(), Supervisor).with_hook(FailingInstall);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report, RunReport::default());
        for name in ["migrate", "api", "web", "worker"] {
            assert_eq!(
                orchestrator.notifications().state(name).unwrap(),
                LifecycleState::NotStarted
            );
        }
        orchestrator.shutdown().await;
    }
}
