//! Lazy string templates over deferred values
//!
//! An [`Expression`] is an ordered list of literal text and references to
//! values that are resolved later (endpoint hosts and ports, generated
//! secrets, other expressions). Evaluation waits for every reference
//! concurrently and concatenates the segments in declaration order.
//!
//! # Example
//!
//! ```rust,ignore
//! let connection_string = Expression::builder()
//!     .literal("db://")
//!     .value(endpoint.property(EndpointProperty::Host))
//!     .literal(":")
//!     .value(endpoint.property(EndpointProperty::Port))
//!     .build();
//!
//! let rendered = connection_string.evaluate(&cancel).await?;
//! ```

mod provider;

pub use provider::ValueProvider;

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};

/// One piece of an [`Expression`]
#[derive(Clone)]
pub enum Segment {
    Literal(String),
    Reference(Arc<dyn ValueProvider>),
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Segment::Reference(provider) => {
                f.debug_tuple("Reference").field(&provider.describe()).finish()
            }
        }
    }
}

/// A composite of literal text and deferred references
#[derive(Clone, Debug, Default)]
pub struct Expression {
    segments: Vec<Segment>,
}

impl Expression {
    pub fn builder() -> ExpressionBuilder {
        ExpressionBuilder::default()
    }

    /// An expression with no references; evaluates without suspending.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Literal(text.into())],
        }
    }

    /// Build an expression from a `{name}` template.
    ///
    /// `{{` and `}}` produce literal braces. Every placeholder must name one of
    /// the supplied values.
    pub fn format<I, K>(template: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Arc<dyn ValueProvider>)>,
        K: Into<String>,
    {
        let values: HashMap<String, Arc<dyn ValueProvider>> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let mut builder = Self::builder();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(OrchestraError::Configuration(format!(
                                    "unterminated placeholder in template: {template}"
                                )));
                            }
                        }
                    }
                    let provider = values.get(name.trim()).ok_or_else(|| {
                        OrchestraError::Configuration(format!(
                            "template placeholder {{{name}}} has no value"
                        ))
                    })?;
                    if !literal.is_empty() {
                        builder = builder.literal(std::mem::take(&mut literal));
                    }
                    builder = builder.reference(Arc::clone(provider));
                }
                '}' => {
                    return Err(OrchestraError::Configuration(format!(
                        "unmatched '}}' in template: {template}"
                    )));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            builder = builder.literal(literal);
        }
        Ok(builder.build())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of deferred references (nested expressions count once).
    pub fn reference_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Reference(_)))
            .count()
    }

    /// Wait for every reference and render the final string.
    ///
    /// References are awaited concurrently. Cancellation or a permanently
    /// failed producer surfaces as [`OrchestraError::UnresolvedReference`].
    pub async fn evaluate(&self, cancel: &CancellationToken) -> Result<String> {
        let pending = self.segments.iter().filter_map(|segment| match segment {
            Segment::Reference(provider) => Some(async move {
                provider
                    .get_value(cancel)
                    .await
                    .map_err(|e| unresolved(provider.as_ref(), e))
            }),
            Segment::Literal(_) => None,
        });
        let mut values = try_join_all(pending).await?.into_iter();

        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Reference(_) => rendered.push_str(&values.next().unwrap_or_default()),
            }
        }
        Ok(rendered)
    }

    /// Template form with placeholders for unresolved references.
    pub fn value_expression(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Reference(provider) => provider.describe(),
            })
            .collect()
    }
}

fn unresolved(provider: &dyn ValueProvider, error: OrchestraError) -> OrchestraError {
    match error {
        already @ OrchestraError::UnresolvedReference { .. } => already,
        OrchestraError::Cancelled => OrchestraError::unresolved(provider.describe(), "cancelled"),
        other => OrchestraError::unresolved(provider.describe(), other.to_string()),
    }
}

#[async_trait]
impl ValueProvider for Expression {
    async fn get_value(&self, cancel: &CancellationToken) -> Result<String> {
        self.evaluate(cancel).await
    }

    fn describe(&self) -> String {
        self.value_expression()
    }
}

impl From<&str> for Expression {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

impl From<String> for Expression {
    fn from(text: String) -> Self {
        Self::literal(text)
    }
}

/// Fluent construction of an [`Expression`]
#[derive(Default)]
pub struct ExpressionBuilder {
    segments: Vec<Segment>,
}

impl ExpressionBuilder {
    pub fn literal(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if let Some(Segment::Literal(previous)) = self.segments.last_mut() {
            previous.push_str(&text);
        } else {
            self.segments.push(Segment::Literal(text));
        }
        self
    }

    pub fn value<P: ValueProvider + 'static>(self, provider: P) -> Self {
        self.reference(Arc::new(provider))
    }

    pub fn reference(mut self, provider: Arc<dyn ValueProvider>) -> Self {
        self.segments.push(Segment::Reference(provider));
        self
    }

    /// Embed another expression as a single reference.
    pub fn expression(self, expression: Expression) -> Self {
        self.value(expression)
    }

    pub fn build(self) -> Expression {
        Expression {
            segments: self.segments,
        }
    }
}
