//! Query validation
//!
//! A single traversal checking field allow/deny lists, wildcard policies,
//! and depth/clause thresholds. Failures accumulate on a
//! [`ValidationResult`]; nothing here ever throws. The checks are usable
//! standalone through [`QueryValidator`] or as a chain pass through
//! [`ValidationVisitor`].

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ast::{Document, QueryNode};
use crate::error::Result;
use crate::visitor::context::{ValidationError, ValidationResult, VisitorContext};
use crate::visitor::QueryVisitor;

/// Default chain position for [`ValidationVisitor`]; runs last so it sees
/// resolved fields and expanded includes
pub const VALIDATION_PRIORITY: i32 = 40;

/// Validation policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// When set, every field name must appear here
    pub allowed_fields: Option<HashSet<String>>,
    /// Field names that are never allowed
    #[serde(default)]
    pub denied_fields: HashSet<String>,
    /// Permit terms starting with `*` or `?`
    pub allow_leading_wildcards: bool,
    /// Permit a whole query that is just `*` or `*:*`
    pub allow_wildcard_only_queries: bool,
    /// Maximum nesting depth of the tree
    pub max_depth: Option<usize>,
    /// Maximum total number of boolean clauses
    pub max_clause_count: Option<usize>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allowed_fields: None,
            denied_fields: HashSet::new(),
            allow_leading_wildcards: true,
            allow_wildcard_only_queries: true,
            max_depth: None,
            max_clause_count: None,
        }
    }
}

/// Synchronous validator over a parsed document
#[derive(Clone, Debug, Default)]
pub struct QueryValidator {
    options: ValidationOptions,
}

impl QueryValidator {
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    pub fn validate(&self, document: &Document<'_>) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.options.allow_wildcard_only_queries && is_wildcard_only(document) {
            result.errors.push(ValidationError::new(
                "wildcard_only",
                "wildcard-only queries are not allowed",
            ));
        }

        let mut state = CheckState::default();
        if let Some(query) = &document.query {
            self.check(query, 1, &mut state, &mut result);
        }

        if let Some(max) = self.options.max_clause_count {
            if state.clause_count > max {
                result.errors.push(ValidationError::new(
                    "max_clauses",
                    format!("query has {} clauses, limit is {max}", state.clause_count),
                ));
            }
        }

        result
    }

    fn check(
        &self,
        node: &QueryNode<'_>,
        depth: usize,
        state: &mut CheckState,
        result: &mut ValidationResult,
    ) {
        if let Some(max) = self.options.max_depth {
            if depth > max && !state.depth_reported {
                state.depth_reported = true;
                result.errors.push(ValidationError::new(
                    "max_depth",
                    format!("query nesting exceeds limit of {max}"),
                ));
            }
        }

        match node {
            QueryNode::Field(field) => {
                self.check_field_name(&field.name, result);
                self.check(&field.inner, depth + 1, state, result);
            }
            QueryNode::Exists(exists) => self.check_field_name(&exists.field, result),
            QueryNode::Missing(missing) => self.check_field_name(&missing.field, result),
            QueryNode::Term(term) => {
                if !self.options.allow_leading_wildcards && term.has_leading_wildcard() {
                    result.errors.push(
                        ValidationError::new(
                            "leading_wildcard",
                            "terms may not start with a wildcard",
                        )
                        .with_value(term.value.to_string()),
                    );
                }
            }
            QueryNode::Boolean(boolean) => {
                state.clause_count += boolean.clauses.len();
                for clause in &boolean.clauses {
                    self.check(&clause.node, depth + 1, state, result);
                }
            }
            QueryNode::Group(group) => self.check(&group.inner, depth + 1, state, result),
            QueryNode::Not(not) => self.check(&not.inner, depth + 1, state, result),
            QueryNode::Phrase(_)
            | QueryNode::Regex(_)
            | QueryNode::Range(_)
            | QueryNode::MatchAll(_)
            | QueryNode::MultiTerm(_) => {}
        }
    }

    fn check_field_name(&self, name: &str, result: &mut ValidationResult) {
        if let Some(allowed) = &self.options.allowed_fields {
            if !allowed.contains(name) {
                result.errors.push(
                    ValidationError::new("field_not_allowed", format!("field '{name}' is not allowed"))
                        .with_field(name),
                );
                return;
            }
        }
        if self.options.denied_fields.contains(name) {
            result.errors.push(
                ValidationError::new("field_denied", format!("field '{name}' is denied"))
                    .with_field(name),
            );
        }
    }
}

#[derive(Default)]
struct CheckState {
    clause_count: usize,
    depth_reported: bool,
}

/// The root is wildcard-only when it is `*:*` or a lone `*` term, possibly
/// inside groups
fn is_wildcard_only(document: &Document<'_>) -> bool {
    fn inner(node: &QueryNode<'_>) -> bool {
        match node {
            QueryNode::MatchAll(_) => true,
            QueryNode::Term(term) => term.value == "*",
            QueryNode::Group(group) => inner(&group.inner),
            _ => false,
        }
    }
    document.query.as_ref().is_some_and(inner)
}

/// Chain pass wrapping [`QueryValidator`]; merges its findings into the
/// context and leaves the tree untouched
pub struct ValidationVisitor {
    validator: QueryValidator,
    priority: i32,
}

impl ValidationVisitor {
    pub fn new(options: ValidationOptions) -> Self {
        Self {
            validator: QueryValidator::new(options),
            priority: VALIDATION_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl QueryVisitor for ValidationVisitor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &'static str {
        "validation"
    }

    async fn visit_document<'a>(
        &self,
        document: Document<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Document<'a>> {
        let result = self.validator.validate(&document);
        ctx.validation.merge(result);
        Ok(document)
    }
}
