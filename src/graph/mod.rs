//! Resource graph
//!
//! The graph is the explicit application model handed to every component of
//! one orchestration run. It is assembled through [`GraphBuilder`] and, once
//! built, is immutable: descriptors are shared as `Arc<ResourceDescriptor>`
//! and no component can append annotations anymore.

mod builder;
mod validate;

pub use builder::GraphBuilder;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrchestraError, Result};
use crate::resource::ResourceDescriptor;

struct Inner {
    resources: Vec<Arc<ResourceDescriptor>>,
    index: HashMap<String, usize>,
}

/// Frozen, validated set of resources
#[derive(Clone)]
pub struct ResourceGraph {
    inner: Arc<Inner>,
}

impl ResourceGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    fn from_parts(resources: Vec<Arc<ResourceDescriptor>>, index: HashMap<String, usize>) -> Self {
        Self {
            inner: Arc::new(Inner { resources, index }),
        }
    }

    /// Resources in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDescriptor>> {
        self.inner.resources.iter()
    }

    pub fn get(&self, name: &str) -> Result<Arc<ResourceDescriptor>> {
        self.inner
            .index
            .get(name)
            .map(|&i| Arc::clone(&self.inner.resources[i]))
            .ok_or_else(|| OrchestraError::not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.resources.is_empty()
    }

    /// Resources `name` waits on.
    pub fn dependencies(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .get(name)?
            .wait_conditions()
            .iter()
            .map(|c| c.dependency.clone())
            .collect())
    }

    /// Resources waiting on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.resources()
            .filter(|r| r.wait_conditions().iter().any(|c| c.dependency == name))
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Resources whose parent is `name`.
    pub fn children(&self, name: &str) -> Vec<Arc<ResourceDescriptor>> {
        self.resources()
            .filter(|r| r.parent() == Some(name))
            .cloned()
            .collect()
    }
}
