//! Anything that can appear as a reference inside an [`Expression`](super::Expression)

use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::deferred::DeferredValue;
use crate::error::Result;

/// A source of a string value that may not be known yet.
///
/// Implemented by [`DeferredValue`], by [`Expression`](super::Expression)
/// itself (so expressions compose) and by endpoint property references.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    /// Wait for and render the value.
    async fn get_value(&self, cancel: &CancellationToken) -> Result<String>;

    /// Placeholder text used in manifests and error messages.
    fn describe(&self) -> String;
}

#[async_trait]
impl<T> ValueProvider for DeferredValue<T>
where
    T: Display + Clone + Send + Sync + 'static,
{
    async fn get_value(&self, cancel: &CancellationToken) -> Result<String> {
        Ok(self.get(cancel).await?.to_string())
    }

    fn describe(&self) -> String {
        format!("{{{}}}", self.label())
    }
}

#[async_trait]
impl<P: ValueProvider + ?Sized> ValueProvider for Arc<P> {
    async fn get_value(&self, cancel: &CancellationToken) -> Result<String> {
        (**self).get_value(cancel).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
