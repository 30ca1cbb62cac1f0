//! # Hostweave
//!
//! In-process coordination core for orchestrating a graph of local resources
//! (containers, executables, external services) during development.
//!
//! Hostweave handles the ordering problems that appear when one resource
//! needs something another resource only knows at runtime: an allocated
//! port, a connection string, a finished migration.
//!
//! ## Features
//!
//! - **Deferred values**: write-once, many-reader placeholders resolved by the platform layer
//! - **Expressions**: templates over deferred values, evaluated concurrently
//! - **Resource graph**: typed descriptors with capability-checked annotations, cycle-checked wait conditions
//! - **Events**: ordered, awaited publish/subscribe scoped to a resource or the whole graph
//! - **Notifications**: one source of truth for every resource's lifecycle state
//! - **Lifecycle hooks**: cancellable provisioning tasks before start and after creation
//! - **Wait resolution**: start gating on "healthy", "running" or "completed" dependencies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostweave::prelude::*;
//!
//! # async fn run<S: ProcessSupervisor + 'static>(supervisor: S) -> hostweave::Result<()> {
//! let mut builder = ResourceGraph::builder();
//! builder.add(ResourceDescriptor::new(
//!     "pg",
//!     ResourceKind::Container,
//!     [Capability::HasEndpoint, Capability::HasConnectionString, Capability::SupportsHealthCheck],
//! ))?;
//! builder.add(ResourceDescriptor::new("api", ResourceKind::Project, [Capability::SupportsWaiting]))?;
//!
//! builder.with_endpoint("pg", "tcp", "tcp", Some(5432))?;
//! let host = builder.resource("pg")?.endpoint_property("tcp", EndpointProperty::HostAndPort)?;
//! builder.with_connection_string(
//!     "pg",
//!     Expression::builder().literal("postgres://").value(host).literal("/app").build(),
//! )?;
//! builder.wait_for("api", "pg")?;
//!
//! let orchestrator = Orchestrator::new(
//!     builder.build()?,
//!     OrchestratorConfig::default(),
//!     LocalhostAllocator::default(),
//!     supervisor,
//! );
//! let report = orchestrator.run().await?;
//! tracing::info!(started = ?report.started, "up");
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deferred;
pub mod error;
pub mod eventing;
pub mod expression;
pub mod graph;
pub mod hooks;
pub mod notification;
pub mod orchestrator;
pub mod resource;
pub mod wait;

// Re-export core types
pub use config::{ConfigService, ExecutionMode, OrchestratorConfig};
pub use deferred::DeferredValue;
pub use error::{OrchestraError, Result};
pub use eventing::EventBus;
pub use expression::Expression;
pub use graph::{GraphBuilder, ResourceGraph};
pub use hooks::{LifecycleHook, LifecycleHookRunner};
pub use notification::{LifecycleState, ResourceNotificationService};
pub use orchestrator::Orchestrator;
pub use resource::ResourceDescriptor;
pub use wait::WaitResolver;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
///
/// ```
/// use hostweave::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, ExecutionMode, OrchestratorConfig};
    pub use crate::deferred::DeferredValue;
    pub use crate::error::{OrchestraError, Result};
    pub use crate::eventing::{
        AfterResourcesCreatedEvent, BeforeResourceStartedEvent, BeforeStartEvent,
        ConnectionStringAvailableEvent, Event, EventBus, ResourceEndpointsAllocatedEvent,
        ResourceReadyEvent, Subscription,
    };
    pub use crate::expression::{Expression, ValueProvider};
    pub use crate::graph::{GraphBuilder, ResourceGraph};
    pub use crate::hooks::{HookContext, HookPhase, HookTaskState, LifecycleHook, LifecycleHookRunner};
    pub use crate::notification::{
        ExitRequirement, LifecycleState, ResourceNotificationService, ResourceSnapshot, StateStyle,
        StateTarget,
    };
    pub use crate::orchestrator::{
        FailureCause, FailureExplanation, LocalhostAllocator, Orchestrator, PlatformAllocator,
        ProcessSupervisor, RunReport,
    };
    pub use crate::resource::{
        AllocatedEndpoint, Annotation, Capability, ContainerImage, EndpointAnnotation,
        EndpointProperty, ResourceDescriptor, ResourceKind,
    };
    pub use crate::wait::{WaitBehavior, WaitCondition, WaitResolver};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
