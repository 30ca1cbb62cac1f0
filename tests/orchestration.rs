use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostweave::hooks::HookContext;
use hostweave::prelude::*;

/// Drives every started resource to `Running`, then `Healthy` if it has a
/// health check. `seed` runs to completion.
struct FakeSupervisor {
    started: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(
        &self,
        resource: Arc<ResourceDescriptor>,
        notifications: ResourceNotificationService,
        _cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let name = resource.name().to_string();
        self.started.lock().unwrap().push(name.clone());

        notifications.update_state(&name, LifecycleState::Starting)?;
        notifications.update_state(&name, LifecycleState::Running)?;
        if name == "seed" {
            notifications.update_state(&name, LifecycleState::Exited(0))?;
        } else if resource.annotation(hostweave::resource::AnnotationKind::HealthCheck).is_some() {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = notifications.update_state(&name, LifecycleState::Healthy);
            });
        }
        Ok(())
    }
}

/// Background task that waits for shutdown, like a long model download.
struct ModelPull;

#[async_trait]
impl LifecycleHook for ModelPull {
    fn name(&self) -> &str {
        "model-pull"
    }

    fn applies_to(&self, resource: &ResourceDescriptor) -> bool {
        resource.parent() == Some("pg")
    }

    async fn after_resources_created(&self, ctx: HookContext) -> anyhow::Result<()> {
        ctx.report_progress(10)?;
        ctx.cancellation().cancelled().await;
        Ok(())
    }
}

fn graph() -> ResourceGraph {
    let mut builder = ResourceGraph::builder();
    builder
        .add(ResourceDescriptor::new(
            "pg",
            ResourceKind::Container,
            [
                Capability::HasEndpoint,
                Capability::HasConnectionString,
                Capability::SupportsHealthCheck,
                Capability::SupportsWaiting,
            ],
        ))
        .unwrap();
    builder
        .add(ResourceDescriptor::new("pgdata", ResourceKind::External, [Capability::SupportsWaiting]).with_parent("pg"))
        .unwrap();
    builder
        .add(ResourceDescriptor::new("seed", ResourceKind::Executable, [Capability::SupportsWaiting]))
        .unwrap();
    builder
        .add(ResourceDescriptor::new(
            "api",
            ResourceKind::Project,
            [Capability::SupportsWaiting, Capability::HasEnvironment],
        ))
        .unwrap();

    builder
        .annotate(
            "pg",
            Annotation::Endpoint(EndpointAnnotation::new("pg", "tcp", "tcp").with_port(5432)),
        )
        .unwrap()
        .with_health_check("pg", "pg_ready")
        .unwrap();
    let address = builder
        .resource("pg")
        .unwrap()
        .endpoint_property("tcp", EndpointProperty::HostAndPort)
        .unwrap();
    let connection = Expression::builder()
        .literal("Host=")
        .value(address)
        .literal(";Database=app")
        .build();
    builder.with_connection_string("pg", connection.clone()).unwrap();

    builder
        .with_environment("api", move |env| {
            env.set("LOG_LEVEL", "debug");
            env.set("DB", connection.clone());
        })
        .unwrap()
        .with_environment("api", |env| env.set("LOG_LEVEL", "info"))
        .unwrap();

    builder.wait_for("seed", "pg").unwrap();
    builder.wait_for("api", "pg").unwrap();
    builder
        .wait_for_completion("api", "seed", ExitRequirement::Success)
        .unwrap();
    builder.build().unwrap()
}

#[tokio::test]
async fn full_run_orders_startup_and_publishes_events() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let started = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new(
        graph(),
        OrchestratorConfig::default().shutdown_timeout(Duration::from_secs(2)),
        LocalhostAllocator::default(),
        FakeSupervisor {
            started: Arc::clone(&started),
        },
    )
    .with_hook(ModelPull);

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        orchestrator
            .events()
            .subscribe_resource::<ConnectionStringAvailableEvent, _, _>("pg", move |event, _| {
                let events = Arc::clone(&events);
                async move {
                    events
                        .lock()
                        .unwrap()
                        .push(format!("connection:{}", event.connection_string));
                    Ok(())
                }
            });
    }
    {
        let events = Arc::clone(&events);
        orchestrator
            .events()
            .subscribe::<BeforeResourceStartedEvent, _, _>(move |event, _| {
                let events = Arc::clone(&events);
                async move {
                    events
                        .lock()
                        .unwrap()
                        .push(format!("starting:{}", event.resource.name()));
                    Ok(())
                }
            });
    }
    let (ready_tx, mut ready_rx) = tokio::sync::mpsc::unbounded_channel();
    orchestrator
        .events()
        .subscribe::<ResourceReadyEvent, _, _>(move |event, _| {
            let ready_tx = ready_tx.clone();
            async move {
                ready_tx.send((event.resource.name().to_string(), event.snapshot.state))?;
                Ok(())
            }
        });

    let report = orchestrator.run().await.unwrap();
    assert!(report.failed.is_empty());
    assert!(report.blocked.is_empty());
    assert_eq!(report.started.len(), 4);

    // seed waited for pg healthy, api waited for seed
    let order = started.lock().unwrap().clone();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position("pg") < position("seed"));
    assert!(position("seed") < position("api"));

    let events = events.lock().unwrap().clone();
    assert!(events.contains(&"connection:Host=localhost:5432;Database=app".to_string()));
    assert!(events.contains(&"starting:api".to_string()));

    let (name, state) = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let ready = ready_rx.recv().await.unwrap();
            if ready.0 == "pg" {
                return ready;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!((name.as_str(), state), ("pg", LifecycleState::Healthy));

    let api = orchestrator.graph().get("api").unwrap();
    let env = api.environment(&CancellationToken::new()).await.unwrap();
    assert_eq!(env["LOG_LEVEL"], "info");
    assert_eq!(env["DB"], "Host=localhost:5432;Database=app");

    let pull = &orchestrator.hooks().reports_for("pgdata")[0];
    assert_eq!(pull.state, HookTaskState::Running);

    orchestrator.shutdown().await;
    assert_eq!(
        orchestrator.hooks().reports_for("pgdata")[0].state,
        HookTaskState::Cancelled
    );
}

#[tokio::test]
async fn failing_event_handler_does_not_stop_the_run() {
    let orchestrator = Orchestrator::new(
        graph(),
        OrchestratorConfig::default(),
        LocalhostAllocator::default(),
        FakeSupervisor {
            started: Arc::new(Mutex::new(Vec::new())),
        },
    );
    orchestrator
        .events()
        .subscribe_resource::<ResourceEndpointsAllocatedEvent, _, _>("pg", |_, _| async {
            Err(anyhow::anyhow!("certificate export failed"))
        });

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.started.len(), 4);

    let faults = orchestrator.events().faults_for("pg");
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].message, "certificate export failed");
    orchestrator.shutdown().await;
}
