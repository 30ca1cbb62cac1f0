//! Network endpoints whose concrete host and port are allocated at run time

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::deferred::DeferredValue;
use crate::error::Result;
use crate::expression::ValueProvider;

/// Host and port bound by the platform allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedEndpoint {
    pub host: String,
    pub port: u16,
}

impl AllocatedEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for AllocatedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A named endpoint declared on a resource
#[derive(Debug, Clone)]
pub struct EndpointAnnotation {
    pub name: String,
    pub scheme: String,
    /// Port the service listens on inside its container or process.
    pub target_port: Option<u16>,
    /// Host port requested by the application; `None` lets the platform choose.
    pub port: Option<u16>,
    pub is_external: bool,
    allocated: DeferredValue<AllocatedEndpoint>,
}

impl EndpointAnnotation {
    pub fn new(resource: &str, name: impl Into<String>, scheme: impl Into<String>) -> Self {
        let name = name.into();
        let label = format!("{resource}.bindings.{name}");
        Self {
            name,
            scheme: scheme.into(),
            target_port: None,
            port: None,
            is_external: false,
            allocated: DeferredValue::new(label),
        }
    }

    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn allocated(&self) -> &DeferredValue<AllocatedEndpoint> {
        &self.allocated
    }

    /// Called once by the platform allocator after binding.
    pub fn allocate(&self, endpoint: AllocatedEndpoint) -> Result<()> {
        tracing::debug!(endpoint = %self.allocated.label(), bound = %endpoint, "Endpoint allocated");
        self.allocated.resolve(endpoint)
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated.is_resolved()
    }

    pub fn property(&self, property: EndpointProperty) -> EndpointPropertyReference {
        EndpointPropertyReference {
            scheme: self.scheme.clone(),
            target_port: self.target_port,
            allocated: self.allocated.clone(),
            property,
        }
    }
}

/// Addressable part of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "camelCase")]
pub enum EndpointProperty {
    Url,
    Host,
    Port,
    HostAndPort,
    Scheme,
    TargetPort,
}

/// An expression segment reading one property of an endpoint
#[derive(Debug, Clone)]
pub struct EndpointPropertyReference {
    scheme: String,
    target_port: Option<u16>,
    allocated: DeferredValue<AllocatedEndpoint>,
    property: EndpointProperty,
}

#[async_trait]
impl ValueProvider for EndpointPropertyReference {
    async fn get_value(&self, cancel: &CancellationToken) -> Result<String> {
        match self.property {
            EndpointProperty::Scheme => return Ok(self.scheme.clone()),
            EndpointProperty::TargetPort => {
                if let Some(port) = self.target_port {
                    return Ok(port.to_string());
                }
            }
            _ => {}
        }

        let endpoint = self.allocated.get(cancel).await?;
        Ok(match self.property {
            EndpointProperty::Url => format!("{}://{}:{}", self.scheme, endpoint.host, endpoint.port),
            EndpointProperty::Host => endpoint.host,
            EndpointProperty::HostAndPort => endpoint.to_string(),
            EndpointProperty::Port | EndpointProperty::TargetPort => endpoint.port.to_string(),
            EndpointProperty::Scheme => self.scheme.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("{{{}.{}}}", self.allocated.label(), self.property)
    }
}
