use std::collections::HashMap;
use std::sync::Arc;

use super::{validate, ResourceGraph};
use crate::error::{OrchestraError, Result};
use crate::expression::Expression;
use crate::notification::ExitRequirement;
use crate::resource::{
    Annotation, ContainerImage, EndpointAnnotation, EnvironmentCallback, EnvironmentContext,
    HealthCheck, ResourceDescriptor,
};
use crate::wait::{WaitBehavior, WaitCondition};

/// Builder for assembling a resource graph
///
/// Descriptors are mutable only while they live here. [`build`](Self::build)
/// validates the declared wait conditions and freezes everything into a
/// [`ResourceGraph`].
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = GraphBuilder::new();
/// builder.add(ResourceDescriptor::new("pg", ResourceKind::Container, [Capability::HasEndpoint]))?;
/// builder.add(ResourceDescriptor::new("api", ResourceKind::Project, [Capability::SupportsWaiting]))?;
/// builder.wait_for("api", "pg")?;
/// let graph = builder.build()?;
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    resources: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Names must be unique within the graph.
    pub fn add(&mut self, descriptor: ResourceDescriptor) -> Result<&mut Self> {
        let name = descriptor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(OrchestraError::DuplicateResource { name });
        }
        tracing::debug!(resource = %name, kind = %descriptor.kind(), "Registering resource");
        self.index.insert(name, self.resources.len());
        self.resources.push(descriptor);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.resources[i])
            .ok_or_else(|| OrchestraError::not_found(name))
    }

    pub fn resource_mut(&mut self, name: &str) -> Result<&mut ResourceDescriptor> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.resources[i]),
            None => Err(OrchestraError::not_found(name)),
        }
    }

    pub fn annotate(&mut self, name: &str, annotation: Annotation) -> Result<&mut Self> {
        self.resource_mut(name)?.annotate(annotation)?;
        Ok(self)
    }

    pub fn with_endpoint(
        &mut self,
        name: &str,
        endpoint: impl Into<String>,
        scheme: impl Into<String>,
        target_port: Option<u16>,
    ) -> Result<&mut Self> {
        let mut annotation = EndpointAnnotation::new(name, endpoint, scheme);
        annotation.target_port = target_port;
        self.annotate(name, Annotation::Endpoint(annotation))
    }

    pub fn with_image(&mut self, name: &str, image: ContainerImage) -> Result<&mut Self> {
        self.annotate(name, Annotation::ContainerImage(image))
    }

    pub fn with_connection_string(&mut self, name: &str, expression: Expression) -> Result<&mut Self> {
        self.annotate(name, Annotation::ConnectionString(expression))
    }

    pub fn with_environment<F>(&mut self, name: &str, callback: F) -> Result<&mut Self>
    where
        F: Fn(&mut EnvironmentContext) + Send + Sync + 'static,
    {
        self.annotate(
            name,
            Annotation::EnvironmentCallback(EnvironmentCallback::new(callback)),
        )
    }

    pub fn with_health_check(&mut self, name: &str, key: impl Into<String>) -> Result<&mut Self> {
        self.annotate(name, Annotation::HealthCheck(HealthCheck { key: key.into() }))
    }

    /// Record that `consumer` uses `dependency` without gating its start.
    pub fn with_reference(&mut self, consumer: &str, dependency: &str) -> Result<&mut Self> {
        self.annotate(consumer, Annotation::Reference(dependency.to_string()))
    }

    pub fn wait_on(&mut self, waiter: &str, condition: WaitCondition) -> Result<&mut Self> {
        tracing::debug!(
            resource = %waiter,
            dependency = %condition.dependency,
            behavior = %condition.behavior,
            "Declaring wait condition"
        );
        self.resource_mut(waiter)?.add_wait_condition(condition)?;
        Ok(self)
    }

    /// Hold `waiter` until `dependency` is healthy.
    pub fn wait_for(&mut self, waiter: &str, dependency: &str) -> Result<&mut Self> {
        self.wait_on(waiter, WaitCondition::new(dependency, WaitBehavior::Healthy))
    }

    /// Hold `waiter` until `dependency` is running.
    pub fn wait_for_start(&mut self, waiter: &str, dependency: &str) -> Result<&mut Self> {
        self.wait_on(waiter, WaitCondition::new(dependency, WaitBehavior::Running))
    }

    /// Hold `waiter` until the one-shot `dependency` exits with an accepted code.
    pub fn wait_for_completion(
        &mut self,
        waiter: &str,
        dependency: &str,
        exit: ExitRequirement,
    ) -> Result<&mut Self> {
        self.wait_on(
            waiter,
            WaitCondition::new(dependency, WaitBehavior::Completion(exit)),
        )
    }

    /// Validate and freeze the graph.
    ///
    /// Fails before anything starts if a wait condition names an unknown
    /// resource or the wait edges form a cycle.
    pub fn build(self) -> Result<ResourceGraph> {
        validate::check_references(&self.resources, &self.index)?;
        validate::check_cycles(&self.resources, &self.index)?;

        tracing::info!(resources = self.resources.len(), "Resource graph assembled");
        Ok(ResourceGraph::from_parts(
            self.resources.into_iter().map(Arc::new).collect(),
            self.index,
        ))
    }
}
