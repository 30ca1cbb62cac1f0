//! Resource descriptors
//!
//! A [`ResourceDescriptor`] is the declarative description of one orchestrated
//! unit: a container, an executable, a project or an external dependency.
//! Descriptors are mutable only while owned by the
//! [`GraphBuilder`](crate::graph::GraphBuilder); once the graph is built they
//! are shared as `Arc<ResourceDescriptor>` and can no longer change.

mod annotation;
mod capability;
mod endpoint;
mod environment;

pub use annotation::{Annotation, AnnotationKind, ContainerImage, HealthCheck, Mount};
pub use capability::{Capability, CapabilitySet};
pub use endpoint::{AllocatedEndpoint, EndpointAnnotation, EndpointProperty, EndpointPropertyReference};
pub use environment::{EnvValue, EnvironmentCallback, EnvironmentContext};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};
use crate::expression::Expression;
use crate::wait::WaitCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Container,
    Executable,
    Project,
    Parameter,
    External,
}

#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    name: String,
    kind: ResourceKind,
    capabilities: CapabilitySet,
    parent: Option<String>,
    annotations: Vec<Annotation>,
    wait_conditions: Vec<WaitCondition>,
}

impl ResourceDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        capabilities: impl Into<CapabilitySet>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            capabilities: capabilities.into(),
            parent: None,
            annotations: Vec::new(),
            wait_conditions: Vec::new(),
        }
    }

    /// Mark this resource as a child of another (e.g. a database inside a server).
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(OrchestraError::MissingCapability {
                resource: self.name.clone(),
                capability: capability.to_string(),
            })
        }
    }

    /// Append an annotation. Rejected when the resource lacks the capability
    /// the annotation needs.
    pub fn annotate(&mut self, annotation: Annotation) -> Result<()> {
        if let Some(capability) = annotation.required_capability() {
            self.require(capability)?;
        }
        self.annotations.push(annotation);
        Ok(())
    }

    pub fn add_wait_condition(&mut self, condition: WaitCondition) -> Result<()> {
        self.require(Capability::SupportsWaiting)?;
        self.wait_conditions.push(condition);
        Ok(())
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Most recently added annotation of `kind`.
    pub fn annotation(&self, kind: AnnotationKind) -> Option<&Annotation> {
        self.annotations.iter().rev().find(|a| a.kind() == kind)
    }

    /// Every annotation of `kind`, oldest first.
    pub fn annotations_of(&self, kind: AnnotationKind) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.kind() == kind)
    }

    pub fn wait_conditions(&self) -> &[WaitCondition] {
        &self.wait_conditions
    }

    pub fn container_image(&self) -> Option<&ContainerImage> {
        match self.annotation(AnnotationKind::ContainerImage) {
            Some(Annotation::ContainerImage(image)) => Some(image),
            _ => None,
        }
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Reference(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointAnnotation> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Endpoint(endpoint) => Some(endpoint),
            _ => None,
        })
    }

    pub fn endpoint(&self, name: &str) -> Result<&EndpointAnnotation> {
        self.require(Capability::HasEndpoint)?;
        self.endpoints()
            .filter(|e| e.name == name)
            .last()
            .ok_or_else(|| {
                OrchestraError::Configuration(format!(
                    "resource {} has no endpoint named {name}",
                    self.name
                ))
            })
    }

    pub fn endpoint_property(
        &self,
        endpoint: &str,
        property: EndpointProperty,
    ) -> Result<EndpointPropertyReference> {
        Ok(self.endpoint(endpoint)?.property(property))
    }

    pub fn connection_string_expression(&self) -> Result<&Expression> {
        self.require(Capability::HasConnectionString)?;
        match self.annotation(AnnotationKind::ConnectionString) {
            Some(Annotation::ConnectionString(expression)) => Ok(expression),
            _ => Err(OrchestraError::Configuration(format!(
                "resource {} declares a connection string but none was set",
                self.name
            ))),
        }
    }

    pub async fn connection_string(&self, cancel: &CancellationToken) -> Result<String> {
        self.connection_string_expression()?.evaluate(cancel).await
    }

    /// Run the environment callbacks in order and evaluate every value.
    pub async fn environment(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        self.require(Capability::HasEnvironment)?;

        let mut context = EnvironmentContext::new(&self.name);
        for annotation in &self.annotations {
            if let Annotation::EnvironmentCallback(callback) = annotation {
                callback.apply(&mut context);
            }
        }

        let variables = context.into_variables();
        let evaluated = try_join_all(variables.into_iter().map(|(name, value)| async move {
            let rendered = value.into_expression().evaluate(cancel).await?;
            Ok::<_, OrchestraError>((name, rendered))
        }))
        .await?;
        Ok(evaluated.into_iter().collect())
    }
}
