//! Seams to the platform layer
//!
//! The orchestrator never binds ports or launches processes itself. It asks a
//! [`PlatformAllocator`] to resolve endpoint addresses and a
//! [`ProcessSupervisor`] to start resources.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio_util::sync::CancellationToken;

use crate::notification::ResourceNotificationService;
use crate::resource::{AllocatedEndpoint, ResourceDescriptor};

/// Binds concrete addresses for a resource's endpoints
///
/// Implementations must resolve every endpoint's deferred value exactly once,
/// through [`EndpointAnnotation::allocate`](crate::resource::EndpointAnnotation::allocate).
#[async_trait]
pub trait PlatformAllocator: Send + Sync {
    async fn allocate(
        &self,
        resource: &ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Starts resources and reports what their processes do
///
/// `start` is called only after the resource's wait conditions hold. The
/// supervisor reports every observed transition (started, health probe
/// results, exit code) through the notification service.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start(
        &self,
        resource: Arc<ResourceDescriptor>,
        notifications: ResourceNotificationService,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Allocates every endpoint on one host
///
/// Endpoints with a fixed port keep it; the rest get sequential ports from
/// `first_port` upwards.
pub struct LocalhostAllocator {
    host: String,
    next_port: AtomicU16,
}

impl LocalhostAllocator {
    pub fn new(first_port: u16) -> Self {
        Self {
            host: "localhost".to_string(),
            next_port: AtomicU16::new(first_port),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

impl Default for LocalhostAllocator {
    fn default() -> Self {
        Self::new(49152)
    }
}

#[async_trait]
impl PlatformAllocator for LocalhostAllocator {
    async fn allocate(
        &self,
        resource: &ResourceDescriptor,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        for endpoint in resource.endpoints().filter(|e| !e.is_allocated()) {
            let port = match endpoint.port {
                Some(port) => port,
                None => self.next_port.fetch_add(1, Ordering::Relaxed),
            };
            endpoint.allocate(AllocatedEndpoint::new(self.host.clone(), port))?;
            tracing::debug!(
                resource = %resource.name(),
                endpoint = %endpoint.name,
                port,
                "Endpoint allocated"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Annotation, Capability, EndpointAnnotation, ResourceKind};

    #[tokio::test]
    async fn test_localhost_allocator_keeps_fixed_ports() {
        let mut resource = ResourceDescriptor::new("pg", ResourceKind::Container, [Capability::HasEndpoint]);
        resource
            .annotate(Annotation::Endpoint(EndpointAnnotation::new("pg", "tcp", "tcp").with_port(5432)))
            .unwrap();
        resource
            .annotate(Annotation::Endpoint(EndpointAnnotation::new("pg", "http", "http")))
            .unwrap();

        let allocator = LocalhostAllocator::new(7000);
        allocator.allocate(&resource, &CancellationToken::new()).await.unwrap();
        // Allocating again leaves already bound endpoints alone.
        allocator.allocate(&resource, &CancellationToken::new()).await.unwrap();

        let tcp = resource.endpoint("tcp").unwrap().allocated().try_get().unwrap();
        let http = resource.endpoint("http").unwrap().allocated().try_get().unwrap();
        assert_eq!(tcp.to_string(), "localhost:5432");
        assert_eq!(http.to_string(), "localhost:7000");
    }
}
