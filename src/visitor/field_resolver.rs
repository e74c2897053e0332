//! Field name resolution
//!
//! Rewrites the field names on `Field`, `Exists`, and `Missing` nodes
//! through a caller-supplied resolver. The built-in [`AliasMap`] gives
//! case-insensitive lookup and an optional hierarchical mode that matches
//! dotted-path prefixes, longest first.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ast::{ExistsNode, FieldNode, MissingNode, QueryNode};
use crate::error::Result;
use crate::visitor::context::{ValidationError, VisitorContext};
use crate::visitor::{walk_field, QueryVisitor, Transform};

/// Default chain position for [`FieldResolverVisitor`]
pub const FIELD_RESOLVER_PRIORITY: i32 = 20;

/// Maps a user-visible field name to an internal one
///
/// Returning `Ok(None)` marks the field unresolved; returning `Err` records
/// a validation error without stopping the traversal.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, field: &str, ctx: &VisitorContext) -> Result<Option<String>>;
}

#[async_trait]
impl<F> FieldResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn resolve(&self, field: &str, _ctx: &VisitorContext) -> Result<Option<String>> {
        Ok(self(field))
    }
}

/// Alias table with case-insensitive keys
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct AliasMap {
    aliases: HashMap<String, String>,
}

impl From<HashMap<String, String>> for AliasMap {
    fn from(entries: HashMap<String, String>) -> Self {
        let mut map = AliasMap::default();
        for (alias, target) in entries {
            map.insert(alias, target);
        }
        map
    }
}

impl From<AliasMap> for HashMap<String, String> {
    fn from(map: AliasMap) -> Self {
        map.aliases
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AliasMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = AliasMap::default();
        for (alias, target) in iter {
            map.insert(alias, target);
        }
        map
    }
}

impl AliasMap {
    pub fn insert(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases
            .insert(alias.into().to_lowercase(), target.into());
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Exact (case-insensitive) lookup
    pub fn resolve(&self, field: &str) -> Option<String> {
        self.aliases.get(&field.to_lowercase()).cloned()
    }

    /// Dotted-path lookup: try the full path, then progressively shorter
    /// prefixes; on a hit, the matched prefix is replaced and the suffix
    /// kept. An exact match is the longest prefix, so it always wins.
    pub fn resolve_hierarchical(&self, field: &str) -> Option<String> {
        if let Some(target) = self.resolve(field) {
            return Some(target);
        }
        let mut end = field.len();
        while let Some(dot) = field[..end].rfind('.') {
            end = dot;
            if let Some(target) = self.resolve(&field[..end]) {
                return Some(format!("{}{}", target, &field[end..]));
            }
        }
        None
    }
}

/// [`FieldResolver`] backed by an [`AliasMap`]
pub struct AliasResolver {
    map: AliasMap,
    hierarchical: bool,
}

impl AliasResolver {
    pub fn new(map: AliasMap) -> Self {
        Self {
            map,
            hierarchical: false,
        }
    }

    pub fn hierarchical(map: AliasMap) -> Self {
        Self {
            map,
            hierarchical: true,
        }
    }
}

#[async_trait]
impl FieldResolver for AliasResolver {
    async fn resolve(&self, field: &str, _ctx: &VisitorContext) -> Result<Option<String>> {
        Ok(if self.hierarchical {
            self.map.resolve_hierarchical(field)
        } else {
            self.map.resolve(field)
        })
    }
}

/// Pass that rewrites field names through a resolver
///
/// The pre-resolution name is recorded on the node; fields the resolver
/// does not know are collected on the context's validation result.
pub struct FieldResolverVisitor {
    resolver: Option<Arc<dyn FieldResolver>>,
    priority: i32,
}

impl Default for FieldResolverVisitor {
    fn default() -> Self {
        Self {
            resolver: None,
            priority: FIELD_RESOLVER_PRIORITY,
        }
    }
}

impl FieldResolverVisitor {
    /// Use the resolver carried by the visitor context
    pub fn from_context() -> Self {
        Self::default()
    }

    pub fn new(resolver: Arc<dyn FieldResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn pick(&self, ctx: &VisitorContext) -> Option<Arc<dyn FieldResolver>> {
        self.resolver.clone().or_else(|| ctx.field_resolver.clone())
    }

    async fn resolve_name(
        &self,
        name: &str,
        ctx: &mut VisitorContext,
    ) -> Option<String> {
        let resolver = self.pick(ctx)?;
        match resolver.resolve(name, ctx).await {
            Ok(Some(resolved)) => Some(resolved),
            Ok(None) => {
                ctx.validation.unresolved_fields.insert(name.to_string());
                None
            }
            Err(err) => {
                ctx.validation.errors.push(
                    ValidationError::new("resolver_failed", err.to_string()).with_field(name),
                );
                None
            }
        }
    }
}

#[async_trait]
impl QueryVisitor for FieldResolverVisitor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &'static str {
        "field_resolver"
    }

    async fn visit_field<'a>(
        &self,
        mut node: FieldNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        if let Some(resolved) = self.resolve_name(&node.name, ctx).await {
            if resolved != node.name {
                node.original_name = Some(std::mem::replace(
                    &mut node.name,
                    Cow::Owned(resolved),
                ));
            }
        }
        walk_field(self, node, ctx).await
    }

    async fn visit_exists<'a>(
        &self,
        mut node: ExistsNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        if let Some(resolved) = self.resolve_name(&node.field, ctx).await {
            if resolved != node.field {
                node.original_field = Some(std::mem::replace(
                    &mut node.field,
                    Cow::Owned(resolved),
                ));
            }
        }
        Ok(Transform::Node(QueryNode::Exists(node)))
    }

    async fn visit_missing<'a>(
        &self,
        mut node: MissingNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        if let Some(resolved) = self.resolve_name(&node.field, ctx).await {
            if resolved != node.field {
                node.original_field = Some(std::mem::replace(
                    &mut node.field,
                    Cow::Owned(resolved),
                ));
            }
        }
        Ok(Transform::Node(QueryNode::Missing(node)))
    }
}
