use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::endpoint::EndpointAnnotation;
use super::environment::EnvironmentCallback;
use super::Capability;
use crate::expression::Expression;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub registry: Option<String>,
    pub image: String,
    pub tag: String,
}

impl ContainerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: None,
            image: image.into(),
            tag: tag.into(),
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Fully qualified reference, e.g. `docker.io/library/postgres:17`.
    pub fn reference(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{}:{}", self.image, self.tag),
            None => format!("{}:{}", self.image, self.tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Registered health probe, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AnnotationKind {
    Endpoint,
    ConnectionString,
    EnvironmentCallback,
    ContainerImage,
    Mount,
    HealthCheck,
    Reference,
    Custom,
}

/// Metadata attached to a resource during assembly
#[derive(Debug, Clone)]
pub enum Annotation {
    Endpoint(EndpointAnnotation),
    ConnectionString(Expression),
    EnvironmentCallback(EnvironmentCallback),
    ContainerImage(ContainerImage),
    Mount(Mount),
    HealthCheck(HealthCheck),
    /// Name of another resource this one consumes without waiting on it.
    Reference(String),
    Custom {
        kind: String,
        value: serde_json::Value,
    },
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Endpoint(_) => AnnotationKind::Endpoint,
            Annotation::ConnectionString(_) => AnnotationKind::ConnectionString,
            Annotation::EnvironmentCallback(_) => AnnotationKind::EnvironmentCallback,
            Annotation::ContainerImage(_) => AnnotationKind::ContainerImage,
            Annotation::Mount(_) => AnnotationKind::Mount,
            Annotation::HealthCheck(_) => AnnotationKind::HealthCheck,
            Annotation::Reference(_) => AnnotationKind::Reference,
            Annotation::Custom { .. } => AnnotationKind::Custom,
        }
    }

    /// Capability a resource must declare to carry this annotation.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Annotation::Endpoint(_) => Some(Capability::HasEndpoint),
            Annotation::ConnectionString(_) => Some(Capability::HasConnectionString),
            Annotation::EnvironmentCallback(_) => Some(Capability::HasEnvironment),
            Annotation::HealthCheck(_) => Some(Capability::SupportsHealthCheck),
            _ => None,
        }
    }
}
