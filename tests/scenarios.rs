use std::sync::Arc;
use std::time::Duration;

use hostweave::hooks::{HookContext, HookTaskState, PROGRESS_PROPERTY};
use hostweave::prelude::*;

fn waiting(name: &str, kind: ResourceKind) -> ResourceDescriptor {
    ResourceDescriptor::new(name, kind, [Capability::SupportsWaiting])
}

#[tokio::test]
async fn endpoint_expression_renders_allocated_address() {
    let mut builder = ResourceGraph::builder();
    builder
        .add(ResourceDescriptor::new("db", ResourceKind::Container, [Capability::HasEndpoint]))
        .unwrap();
    builder.with_endpoint("db", "tcp", "tcp", Some(5432)).unwrap();

    let db = builder.resource("db").unwrap();
    let host: Arc<dyn ValueProvider> = Arc::new(db.endpoint_property("tcp", EndpointProperty::Host).unwrap());
    let port: Arc<dyn ValueProvider> = Arc::new(db.endpoint_property("tcp", EndpointProperty::Port).unwrap());
    let expression = Expression::format("db://{host}:{port}", [("host", host), ("port", port)]).unwrap();
    let graph = builder.build().unwrap();

    let cancel = CancellationToken::new();
    let evaluating = {
        let expression = expression.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { expression.evaluate(&cancel).await })
    };

    graph
        .get("db")
        .unwrap()
        .endpoint("tcp")
        .unwrap()
        .allocate(AllocatedEndpoint::new("localhost", 5432))
        .unwrap();

    assert_eq!(evaluating.await.unwrap().unwrap(), "db://localhost:5432");
    assert_eq!(expression.evaluate(&cancel).await.unwrap(), "db://localhost:5432");
}

#[tokio::test]
async fn waiter_resolves_only_after_healthy() {
    let mut builder = ResourceGraph::builder();
    builder.add(waiting("x", ResourceKind::Container)).unwrap();
    builder.add(waiting("y", ResourceKind::Project)).unwrap();
    builder.wait_for("y", "x").unwrap();
    let graph = builder.build().unwrap();

    let notifications = ResourceNotificationService::for_graph(&graph, 64);
    let resolver = WaitResolver::new(graph, notifications.clone());
    let resolving = tokio::spawn(async move { resolver.resolve("y", &CancellationToken::new()).await });

    for state in [LifecycleState::Starting, LifecycleState::Running, LifecycleState::Unhealthy] {
        notifications.update_state("x", state).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!resolving.is_finished(), "resolved early on {state}");
    }

    notifications.update_state("x", LifecycleState::Healthy).unwrap();
    resolving.await.unwrap().unwrap();
}

struct Progress;

#[async_trait]
impl LifecycleHook for Progress {
    fn name(&self) -> &str {
        "download"
    }

    fn applies_to(&self, resource: &ResourceDescriptor) -> bool {
        resource.name() == "z"
    }

    async fn before_start(&self, ctx: HookContext) -> anyhow::Result<()> {
        for percent in [0, 50, 50, 100] {
            ctx.report_progress(percent)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn duplicate_progress_produces_one_notification() {
    let mut builder = ResourceGraph::builder();
    builder.add(waiting("z", ResourceKind::Container)).unwrap();
    let graph = builder.build().unwrap();

    let notifications = ResourceNotificationService::for_graph(&graph, 64);
    let mut changes = notifications.subscribe_all();
    let mut runner = LifecycleHookRunner::new(notifications.clone(), OrchestratorConfig::default());
    runner.register(Progress);

    assert!(runner.run_before_start(&graph).await.is_empty());
    assert_eq!(runner.reports()[0].state, HookTaskState::Succeeded);

    let mut progress = Vec::new();
    while let Ok(change) = changes.try_recv() {
        if let Some(value) = change.snapshot.properties.get(PROGRESS_PROPERTY) {
            progress.push(value.as_u64().unwrap());
        }
    }
    assert_eq!(progress, vec![0, 50, 100]);
}

#[tokio::test]
async fn failed_completion_fails_waiter_and_keeps_it_pending() {
    let mut builder = ResourceGraph::builder();
    builder.add(waiting("t", ResourceKind::Executable)).unwrap();
    builder.add(waiting("w", ResourceKind::Project)).unwrap();
    builder
        .wait_for_completion("w", "t", ExitRequirement::Success)
        .unwrap();
    let graph = builder.build().unwrap();

    let notifications = ResourceNotificationService::for_graph(&graph, 64);
    let resolver = WaitResolver::new(graph, notifications.clone());
    let resolving = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve("w", &CancellationToken::new()).await })
    };

    notifications.update_state("t", LifecycleState::Starting).unwrap();
    notifications.update_state("t", LifecycleState::Running).unwrap();
    notifications.update_state("t", LifecycleState::Exited(1)).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(1), resolving)
        .await
        .expect("resolve should fail without waiting further")
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestraError::ResourceFailed { ref resource, ref waiter, .. }
            if resource == "t" && waiter.as_deref() == Some("w")
    ));
    assert_eq!(notifications.state("w").unwrap(), LifecycleState::Pending);
}

#[tokio::test]
async fn terminal_state_rejects_regression() {
    let notifications = ResourceNotificationService::new(16);
    notifications.register("job");
    for state in [
        LifecycleState::Starting,
        LifecycleState::Running,
        LifecycleState::Healthy,
        LifecycleState::Exited(0),
    ] {
        notifications.update_state("job", state).unwrap();
    }
    assert!(matches!(
        notifications.update_state("job", LifecycleState::Running),
        Err(OrchestraError::InvalidStateTransition { .. })
    ));
    assert_eq!(notifications.state("job").unwrap(), LifecycleState::Exited(0));
}

#[test]
fn cycles_are_rejected_before_anything_starts() {
    let mut builder = ResourceGraph::builder();
    for name in ["a", "b"] {
        builder.add(waiting(name, ResourceKind::Container)).unwrap();
    }
    builder.wait_for("a", "b").unwrap();
    builder.wait_for("b", "a").unwrap();
    assert!(matches!(builder.build(), Err(OrchestraError::CycleDetected { .. })));
}
