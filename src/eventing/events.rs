//! Lifecycle events published during an orchestration run

use std::sync::Arc;

use super::Event;
use crate::graph::ResourceGraph;
use crate::notification::ResourceSnapshot;
use crate::resource::ResourceDescriptor;

/// Published once before any resource starts.
#[derive(Clone)]
pub struct BeforeStartEvent {
    pub graph: ResourceGraph,
}

impl Event for BeforeStartEvent {}

/// Published once after every resource has been created.
#[derive(Clone)]
pub struct AfterResourcesCreatedEvent {
    pub graph: ResourceGraph,
}

impl Event for AfterResourcesCreatedEvent {}

/// All endpoints of one resource have concrete hosts and ports.
#[derive(Clone)]
pub struct ResourceEndpointsAllocatedEvent {
    pub resource: Arc<ResourceDescriptor>,
}

impl Event for ResourceEndpointsAllocatedEvent {
    fn scope(&self) -> Option<&str> {
        Some(self.resource.name())
    }
}

/// The connection string expression of one resource evaluated successfully.
#[derive(Clone)]
pub struct ConnectionStringAvailableEvent {
    pub resource: Arc<ResourceDescriptor>,
    pub connection_string: String,
}

impl Event for ConnectionStringAvailableEvent {
    fn scope(&self) -> Option<&str> {
        Some(self.resource.name())
    }
}

/// A resource's wait conditions hold and its start command is about to be issued.
#[derive(Clone)]
pub struct BeforeResourceStartedEvent {
    pub resource: Arc<ResourceDescriptor>,
}

impl Event for BeforeResourceStartedEvent {
    fn scope(&self) -> Option<&str> {
        Some(self.resource.name())
    }
}

/// A resource reached a ready state (healthy, or running without health checks).
#[derive(Clone)]
pub struct ResourceReadyEvent {
    pub resource: Arc<ResourceDescriptor>,
    pub snapshot: ResourceSnapshot,
}

impl Event for ResourceReadyEvent {
    fn scope(&self) -> Option<&str> {
        Some(self.resource.name())
    }
}
