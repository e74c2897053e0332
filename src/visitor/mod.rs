//! Visitor framework for AST transformation
//!
//! One `visit_*` entry per node variant; default implementations recurse
//! into children through the free `walk_*` functions and return the node
//! unchanged. Visitors override only the variants they care about.
//!
//! Every visit is async-capable because include expansion and field
//! resolution may call out to caller-supplied I/O; the built-in passes
//! otherwise complete synchronously. Traversal is pre-order (a parent is
//! visited before its children) and strictly sequential.
//!
//! A visit returns a [`Transform`]: the same node (possibly mutated), a
//! different node replacing it, or [`Transform::Remove`], which deletes the
//! entry from the parent. Removal at the root yields an empty document.

pub mod context;
pub mod datemath;
pub mod field_resolver;
pub mod include;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::ast::{
    BooleanNode, Document, ExistsNode, FieldNode, GroupNode, MatchAllNode, MissingNode,
    MultiTermNode, NotNode, PhraseNode, QueryNode, RangeNode, RegexNode, TermNode,
};
use crate::error::Result;

pub use context::{ValidationError, ValidationResult, VisitorContext};

/// Result of visiting a node
pub enum Transform<'a> {
    /// Keep this node in place (it may be the original or a replacement)
    Node(QueryNode<'a>),
    /// Delete the node from its parent
    Remove,
}

/// Double-dispatch visitor over the query AST
///
/// All methods have defaults, so an implementation overrides only the
/// variants it handles.
#[async_trait]
pub trait QueryVisitor: Send + Sync {
    /// Position in a [`VisitorChain`]; lower runs first
    fn priority(&self) -> i32 {
        0
    }

    /// Short name for logs
    fn name(&self) -> &'static str {
        "visitor"
    }

    async fn visit_document<'a>(
        &self,
        document: Document<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Document<'a>> {
        walk_document(self, document, ctx).await
    }

    async fn visit_term<'a>(
        &self,
        node: TermNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Term(node)))
    }

    async fn visit_phrase<'a>(
        &self,
        node: PhraseNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Phrase(node)))
    }

    async fn visit_regex<'a>(
        &self,
        node: RegexNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Regex(node)))
    }

    async fn visit_field<'a>(
        &self,
        node: FieldNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        walk_field(self, node, ctx).await
    }

    async fn visit_range<'a>(
        &self,
        node: RangeNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Range(node)))
    }

    async fn visit_boolean<'a>(
        &self,
        node: BooleanNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        walk_boolean(self, node, ctx).await
    }

    async fn visit_group<'a>(
        &self,
        node: GroupNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        walk_group(self, node, ctx).await
    }

    async fn visit_not<'a>(
        &self,
        node: NotNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        walk_not(self, node, ctx).await
    }

    async fn visit_exists<'a>(
        &self,
        node: ExistsNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Exists(node)))
    }

    async fn visit_missing<'a>(
        &self,
        node: MissingNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::Missing(node)))
    }

    async fn visit_match_all<'a>(
        &self,
        node: MatchAllNode,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::MatchAll(node)))
    }

    async fn visit_multi_term<'a>(
        &self,
        node: MultiTermNode<'a>,
        _ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        Ok(Transform::Node(QueryNode::MultiTerm(node)))
    }
}

/// Dispatch one node to the visitor method for its variant
///
/// When the context's cancellation token has fired, the node is returned
/// untouched so the traversal unwinds promptly with a structurally valid
/// tree.
pub async fn visit_node<'a, V>(
    visitor: &V,
    node: QueryNode<'a>,
    ctx: &mut VisitorContext,
) -> Result<Transform<'a>>
where
    V: QueryVisitor + ?Sized,
{
    if ctx.is_cancelled() {
        return Ok(Transform::Node(node));
    }
    match node {
        QueryNode::Term(n) => visitor.visit_term(n, ctx).await,
        QueryNode::Phrase(n) => visitor.visit_phrase(n, ctx).await,
        QueryNode::Regex(n) => visitor.visit_regex(n, ctx).await,
        QueryNode::Field(n) => visitor.visit_field(n, ctx).await,
        QueryNode::Range(n) => visitor.visit_range(n, ctx).await,
        QueryNode::Boolean(n) => visitor.visit_boolean(n, ctx).await,
        QueryNode::Group(n) => visitor.visit_group(n, ctx).await,
        QueryNode::Not(n) => visitor.visit_not(n, ctx).await,
        QueryNode::Exists(n) => visitor.visit_exists(n, ctx).await,
        QueryNode::Missing(n) => visitor.visit_missing(n, ctx).await,
        QueryNode::MatchAll(n) => visitor.visit_match_all(n, ctx).await,
        QueryNode::MultiTerm(n) => visitor.visit_multi_term(n, ctx).await,
    }
}

pub async fn walk_document<'a, V>(
    visitor: &V,
    mut document: Document<'a>,
    ctx: &mut VisitorContext,
) -> Result<Document<'a>>
where
    V: QueryVisitor + ?Sized,
{
    if let Some(query) = document.query.take() {
        document.query = match visit_node(visitor, query, ctx).await? {
            Transform::Node(node) => Some(node),
            Transform::Remove => None,
        };
    }
    Ok(document)
}

/// Descend into a field's inner query, keeping the context's current-field
/// stack in sync. Removing the inner query removes the whole field.
pub async fn walk_field<'a, V>(
    visitor: &V,
    mut node: FieldNode<'a>,
    ctx: &mut VisitorContext,
) -> Result<Transform<'a>>
where
    V: QueryVisitor + ?Sized,
{
    ctx.push_field(node.name.to_string());
    let result = visit_node(visitor, *node.inner, ctx).await;
    ctx.pop_field();
    match result? {
        Transform::Node(inner) => {
            node.inner = Box::new(inner);
            Ok(Transform::Node(QueryNode::Field(node)))
        }
        Transform::Remove => Ok(Transform::Remove),
    }
}

/// Visit every clause in document order; removed clauses drop out, and a
/// boolean left with no clauses is itself removed
pub async fn walk_boolean<'a, V>(
    visitor: &V,
    node: BooleanNode<'a>,
    ctx: &mut VisitorContext,
) -> Result<Transform<'a>>
where
    V: QueryVisitor + ?Sized,
{
    let BooleanNode { span, clauses } = node;
    let mut kept = Vec::with_capacity(clauses.len());
    for mut clause in clauses {
        match visit_node(visitor, clause.node, ctx).await? {
            Transform::Node(inner) => {
                clause.node = inner;
                kept.push(clause);
            }
            Transform::Remove => {}
        }
    }
    if kept.is_empty() {
        return Ok(Transform::Remove);
    }
    Ok(Transform::Node(QueryNode::Boolean(BooleanNode {
        span,
        clauses: kept,
    })))
}

pub async fn walk_group<'a, V>(
    visitor: &V,
    mut node: GroupNode<'a>,
    ctx: &mut VisitorContext,
) -> Result<Transform<'a>>
where
    V: QueryVisitor + ?Sized,
{
    match visit_node(visitor, *node.inner, ctx).await? {
        Transform::Node(inner) => {
            node.inner = Box::new(inner);
            Ok(Transform::Node(QueryNode::Group(node)))
        }
        Transform::Remove => Ok(Transform::Remove),
    }
}

pub async fn walk_not<'a, V>(
    visitor: &V,
    mut node: NotNode<'a>,
    ctx: &mut VisitorContext,
) -> Result<Transform<'a>>
where
    V: QueryVisitor + ?Sized,
{
    match visit_node(visitor, *node.inner, ctx).await? {
        Transform::Node(inner) => {
            node.inner = Box::new(inner);
            Ok(Transform::Node(QueryNode::Not(node)))
        }
        Transform::Remove => Ok(Transform::Remove),
    }
}

/// An ordered sequence of visitor passes
///
/// Passes run in ascending priority order (stable for ties); each pass
/// completes over the whole tree before the next begins.
#[derive(Default)]
pub struct VisitorChain {
    visitors: Vec<Arc<dyn QueryVisitor>>,
}

impl VisitorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, visitor: Arc<dyn QueryVisitor>) {
        self.visitors.push(visitor);
    }

    pub fn with(mut self, visitor: Arc<dyn QueryVisitor>) -> Self {
        self.add(visitor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    pub async fn run<'a>(
        &self,
        mut document: Document<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Document<'a>> {
        let mut ordered: Vec<&Arc<dyn QueryVisitor>> = self.visitors.iter().collect();
        ordered.sort_by_key(|v| v.priority());

        for visitor in ordered {
            if ctx.is_cancelled() {
                break;
            }
            debug!(visitor = visitor.name(), "running visitor pass");
            document = visitor.visit_document(document, ctx).await?;
        }
        Ok(document)
    }
}
