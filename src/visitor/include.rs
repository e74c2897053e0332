//! `@include:NAME` expansion
//!
//! Replaces include references with the referenced query fragment: the
//! caller-supplied resolver is asked for the fragment text, the text is
//! parsed with the same parser settings, and the parsed tree is grafted in
//! wrapped in a group. Nested includes expand recursively; a stack of
//! in-flight names catches cycles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::ast::{GroupNode, QueryNode, TermNode};
use crate::error::Result;
use crate::parser::QueryStringParser;
use crate::visitor::context::{ValidationError, VisitorContext};
use crate::visitor::{visit_node, QueryVisitor, Transform};

/// Default chain position for [`IncludeVisitor`]; runs before field
/// resolution so resolved fragments get the same treatment as the rest of
/// the query
pub const INCLUDE_PRIORITY: i32 = 10;

/// Marker an include reference carries in term form
pub const INCLUDE_PREFIX: &str = "@include:";

/// Supplies saved query fragments by name
#[async_trait]
pub trait IncludeResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<String>>;
}

#[async_trait]
impl<F> IncludeResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(self(name))
    }
}

#[async_trait]
impl IncludeResolver for HashMap<String, String> {
    async fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name).cloned())
    }
}

/// What to do when the resolver does not know an include name
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingIncludePolicy {
    /// Leave the `@include:NAME` term in the tree
    #[default]
    Keep,
    /// Drop the reference from its parent
    Remove,
    /// Record a validation error (the term stays in the tree)
    Error,
}

/// Pass that expands include references
pub struct IncludeVisitor {
    parser: QueryStringParser,
    resolver: Option<Arc<dyn IncludeResolver>>,
    missing: MissingIncludePolicy,
    priority: i32,
}

impl IncludeVisitor {
    /// `parser` must carry the same settings the original query was parsed
    /// with so fragments combine the same way
    pub fn new(parser: QueryStringParser) -> Self {
        Self {
            parser,
            resolver: None,
            missing: MissingIncludePolicy::default(),
            priority: INCLUDE_PRIORITY,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IncludeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_missing_policy(mut self, policy: MissingIncludePolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn keep<'a>(node: TermNode<'a>) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Term(node)))
    }
}

#[async_trait]
impl QueryVisitor for IncludeVisitor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &'static str {
        "include"
    }

    async fn visit_term<'a>(
        &self,
        node: TermNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        let Some(name) = node.value.strip_prefix(INCLUDE_PREFIX) else {
            return Self::keep(node);
        };
        let name = name.to_string();

        let Some(resolver) = self.resolver.clone().or_else(|| ctx.include_resolver.clone())
        else {
            ctx.validation.errors.push(
                ValidationError::new("include_unresolved", "no include resolver configured")
                    .with_value(&name),
            );
            return Self::keep(node);
        };

        if ctx.include_stack.contains(&name) {
            warn!(include = %name, "cyclic include reference");
            ctx.validation.errors.push(
                ValidationError::new(
                    "include_cycle",
                    format!("include '{name}' references itself"),
                )
                .with_value(&name),
            );
            return Self::keep(node);
        }

        let fragment = match resolver.resolve(&name).await {
            Ok(Some(fragment)) => fragment,
            Ok(None) => {
                return match self.missing {
                    MissingIncludePolicy::Keep => Self::keep(node),
                    MissingIncludePolicy::Remove => Ok(Transform::Remove),
                    MissingIncludePolicy::Error => {
                        ctx.validation.errors.push(
                            ValidationError::new(
                                "include_missing",
                                format!("unknown include '{name}'"),
                            )
                            .with_value(&name),
                        );
                        Self::keep(node)
                    }
                };
            }
            Err(err) => {
                ctx.validation.errors.push(
                    ValidationError::new("include_failed", err.to_string()).with_value(&name),
                );
                return Self::keep(node);
            }
        };

        debug!(include = %name, len = fragment.len(), "expanding include");
        let parsed = self.parser.parse(&fragment);
        if !parsed.is_success() {
            ctx.validation.errors.push(
                ValidationError::new(
                    "include_invalid",
                    format!("include '{name}' does not parse"),
                )
                .with_value(&name),
            );
            return Self::keep(node);
        }
        let Some(query) = parsed.document.query else {
            // an empty fragment expands to nothing
            return Ok(Transform::Remove);
        };

        let group = QueryNode::Group(GroupNode {
            span: node.span,
            inner: Box::new(query.into_owned()),
            boost: None,
        });

        // recurse into the graft so nested includes expand and the
        // in-flight stack sees this name
        ctx.include_stack.push(name);
        let result = visit_node(self, group, ctx).await;
        ctx.include_stack.pop();
        result
    }
}
