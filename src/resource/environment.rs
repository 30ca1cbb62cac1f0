use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::expression::Expression;

/// Value of one environment variable before evaluation
#[derive(Debug, Clone)]
pub enum EnvValue {
    Literal(String),
    Expression(Expression),
}

impl EnvValue {
    pub fn into_expression(self) -> Expression {
        match self {
            EnvValue::Literal(text) => Expression::literal(text),
            EnvValue::Expression(expression) => expression,
        }
    }
}

impl From<&str> for EnvValue {
    fn from(text: &str) -> Self {
        EnvValue::Literal(text.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(text: String) -> Self {
        EnvValue::Literal(text)
    }
}

impl From<Expression> for EnvValue {
    fn from(expression: Expression) -> Self {
        EnvValue::Expression(expression)
    }
}

/// Mutable view handed to environment callbacks
#[derive(Debug)]
pub struct EnvironmentContext {
    resource: String,
    variables: BTreeMap<String, EnvValue>,
}

impl EnvironmentContext {
    pub(crate) fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            variables: BTreeMap::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Set a variable, replacing any value a previous callback wrote.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<EnvValue>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.variables.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<EnvValue> {
        self.variables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub(crate) fn into_variables(self) -> BTreeMap<String, EnvValue> {
        self.variables
    }
}

type CallbackFn = dyn Fn(&mut EnvironmentContext) + Send + Sync;

/// Callback contributing environment variables to a resource
#[derive(Clone)]
pub struct EnvironmentCallback(Arc<CallbackFn>);

impl EnvironmentCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut EnvironmentContext) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub(crate) fn apply(&self, context: &mut EnvironmentContext) {
        (self.0)(context)
    }
}

impl fmt::Debug for EnvironmentCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvironmentCallback")
    }
}
