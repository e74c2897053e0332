//! Shared state threaded through every visitor call

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::QueryOperator;
use crate::visitor::field_resolver::FieldResolver;
use crate::visitor::include::IncludeResolver;

/// A single semantic problem found by a visitor pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Stable machine-readable code, e.g. `field_not_allowed`
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            value: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Accumulated outcome of the semantic passes
///
/// Kept separate from [`ParseError`](crate::error::ParseError)s so a caller
/// can distinguish "could not parse at all" from "parsed, but not
/// permitted".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub unresolved_fields: HashSet<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.unresolved_fields.extend(other.unresolved_fields);
    }
}

/// Context threaded through a visitor pipeline
///
/// Owned exclusively by one pipeline run; never shared across pipelines.
pub struct VisitorContext {
    pub default_operator: QueryOperator,
    pub validation: ValidationResult,
    pub field_resolver: Option<Arc<dyn FieldResolver>>,
    pub include_resolver: Option<Arc<dyn IncludeResolver>>,
    data: HashMap<String, Value>,
    field_stack: Vec<String>,
    pub(crate) include_stack: Vec<String>,
    cancellation: CancellationToken,
}

impl Default for VisitorContext {
    fn default() -> Self {
        Self::new(QueryOperator::default())
    }
}

impl VisitorContext {
    pub fn new(default_operator: QueryOperator) -> Self {
        Self {
            default_operator,
            validation: ValidationResult::default(),
            field_resolver: None,
            include_resolver: None,
            data: HashMap::new(),
            field_stack: Vec::new(),
            include_stack: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_field_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.field_resolver = Some(resolver);
        self
    }

    pub fn with_include_resolver(mut self, resolver: Arc<dyn IncludeResolver>) -> Self {
        self.include_resolver = Some(resolver);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Arbitrary key/value state shared between passes
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Name of the innermost field currently being descended through
    pub fn current_field(&self) -> Option<&str> {
        self.field_stack.last().map(String::as_str)
    }

    /// Dotted path of the full field stack
    pub fn field_path(&self) -> String {
        self.field_stack.join(".")
    }

    pub fn push_field(&mut self, name: String) {
        self.field_stack.push(name);
    }

    pub fn pop_field(&mut self) {
        self.field_stack.pop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
