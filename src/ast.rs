//! Abstract syntax tree for parsed query strings
//!
//! The AST is a closed sum type over node variants. String values are
//! `Cow` slices over the caller-owned source buffer; they become owned only
//! when escapes were decoded or when a visitor pass rewrites them. Every
//! node carries the span of the source region it was parsed from.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::position::Span;

/// How a clause combines into its parent boolean query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occur {
    /// Clause may match (scores when it does)
    Should,
    /// Clause must match (`+` prefix or AND semantics)
    Must,
    /// Clause must not match (`-` prefix)
    MustNot,
}

/// The operator written (or implied) between a clause and its predecessor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClauseOperator {
    And,
    Or,
    /// No operator was written; the parser's default operator applied
    Implicit,
}

/// Edit distance for fuzzy terms
///
/// A bare `~` and an explicit `~2` resolve to the same distance but must
/// stay distinguishable so rendering restores the original form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fuzziness {
    /// `~` with no number
    Auto,
    /// `~N`
    Distance(u32),
}

impl Fuzziness {
    /// The distance actually applied when matching
    pub fn effective_distance(&self) -> u32 {
        match self {
            Fuzziness::Auto => 2,
            Fuzziness::Distance(n) => *n,
        }
    }
}

/// Short-form range comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Root of every parse: the document owns an optional query
///
/// `query = None` represents empty (or whitespace-only) input.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Document<'a> {
    pub span: Span,
    pub query: Option<QueryNode<'a>>,
}

impl<'a> Document<'a> {
    pub fn is_empty(&self) -> bool {
        self.query.is_none()
    }

    /// Deep-copy every borrowed slice so the tree no longer references the
    /// source buffer. Used to graft sub-trees parsed from transient
    /// fragment strings (include expansion) into a longer-lived tree.
    pub fn into_owned(self) -> Document<'static> {
        Document {
            span: self.span,
            query: self.query.map(QueryNode::into_owned),
        }
    }
}

/// The closed set of query node variants
#[derive(Clone, Debug, PartialEq)]
pub enum QueryNode<'a> {
    Term(TermNode<'a>),
    Phrase(PhraseNode<'a>),
    Regex(RegexNode<'a>),
    Field(FieldNode<'a>),
    Range(RangeNode<'a>),
    Boolean(BooleanNode<'a>),
    Group(GroupNode<'a>),
    Not(NotNode<'a>),
    Exists(ExistsNode<'a>),
    Missing(MissingNode<'a>),
    MatchAll(MatchAllNode),
    MultiTerm(MultiTermNode<'a>),
}

impl<'a> QueryNode<'a> {
    pub fn span(&self) -> Span {
        match self {
            QueryNode::Term(n) => n.span,
            QueryNode::Phrase(n) => n.span,
            QueryNode::Regex(n) => n.span,
            QueryNode::Field(n) => n.span,
            QueryNode::Range(n) => n.span,
            QueryNode::Boolean(n) => n.span,
            QueryNode::Group(n) => n.span,
            QueryNode::Not(n) => n.span,
            QueryNode::Exists(n) => n.span,
            QueryNode::Missing(n) => n.span,
            QueryNode::MatchAll(n) => n.span,
            QueryNode::MultiTerm(n) => n.span,
        }
    }

    /// Get the node type name for debugging and logging
    pub fn node_type(&self) -> &'static str {
        match self {
            QueryNode::Term(_) => "term",
            QueryNode::Phrase(_) => "phrase",
            QueryNode::Regex(_) => "regex",
            QueryNode::Field(_) => "field",
            QueryNode::Range(_) => "range",
            QueryNode::Boolean(_) => "bool",
            QueryNode::Group(_) => "group",
            QueryNode::Not(_) => "not",
            QueryNode::Exists(_) => "exists",
            QueryNode::Missing(_) => "missing",
            QueryNode::MatchAll(_) => "match_all",
            QueryNode::MultiTerm(_) => "multi_term",
        }
    }

    pub fn into_owned(self) -> QueryNode<'static> {
        match self {
            QueryNode::Term(n) => QueryNode::Term(TermNode {
                span: n.span,
                raw: own(n.raw),
                value: own(n.value),
                is_prefix: n.is_prefix,
                is_wildcard: n.is_wildcard,
                boost: n.boost,
                fuzzy: n.fuzzy,
            }),
            QueryNode::Phrase(n) => QueryNode::Phrase(PhraseNode {
                span: n.span,
                content: own(n.content),
                slop: n.slop,
                boost: n.boost,
            }),
            QueryNode::Regex(n) => QueryNode::Regex(RegexNode {
                span: n.span,
                pattern: own(n.pattern),
                boost: n.boost,
            }),
            QueryNode::Field(n) => QueryNode::Field(FieldNode {
                span: n.span,
                name: own(n.name),
                original_name: n.original_name.map(own),
                inner: Box::new(n.inner.into_owned()),
            }),
            QueryNode::Range(n) => QueryNode::Range(RangeNode {
                span: n.span,
                min: n.min.map(own),
                max: n.max.map(own),
                min_inclusive: n.min_inclusive,
                max_inclusive: n.max_inclusive,
                operator: n.operator,
                boost: n.boost,
            }),
            QueryNode::Boolean(n) => QueryNode::Boolean(BooleanNode {
                span: n.span,
                clauses: n
                    .clauses
                    .into_iter()
                    .map(|c| Clause {
                        occur: c.occur,
                        operator: c.operator,
                        node: c.node.into_owned(),
                    })
                    .collect(),
            }),
            QueryNode::Group(n) => QueryNode::Group(GroupNode {
                span: n.span,
                inner: Box::new(n.inner.into_owned()),
                boost: n.boost,
            }),
            QueryNode::Not(n) => QueryNode::Not(NotNode {
                span: n.span,
                inner: Box::new(n.inner.into_owned()),
            }),
            QueryNode::Exists(n) => QueryNode::Exists(ExistsNode {
                span: n.span,
                field: own(n.field),
                original_field: n.original_field.map(own),
                is_exists_syntax: n.is_exists_syntax,
            }),
            QueryNode::Missing(n) => QueryNode::Missing(MissingNode {
                span: n.span,
                field: own(n.field),
                original_field: n.original_field.map(own),
            }),
            QueryNode::MatchAll(n) => QueryNode::MatchAll(n),
            QueryNode::MultiTerm(n) => QueryNode::MultiTerm(MultiTermNode {
                span: n.span,
                terms: n.terms.into_iter().map(own).collect(),
                joined: own(n.joined),
            }),
        }
    }
}

fn own(value: Cow<'_, str>) -> Cow<'static, str> {
    Cow::Owned(value.into_owned())
}

/// A single word, optionally prefix/wildcard, with optional boost and
/// fuzziness
///
/// `raw` is the escaped source form; `value` is the unescaped form (they
/// share storage when the term carried no escapes).
#[derive(Clone, Debug, PartialEq)]
pub struct TermNode<'a> {
    pub span: Span,
    pub raw: Cow<'a, str>,
    pub value: Cow<'a, str>,
    pub is_prefix: bool,
    pub is_wildcard: bool,
    pub boost: Option<f32>,
    pub fuzzy: Option<Fuzziness>,
}

impl<'a> TermNode<'a> {
    pub fn new(raw: impl Into<Cow<'a, str>>, value: impl Into<Cow<'a, str>>, span: Span) -> Self {
        Self {
            span,
            raw: raw.into(),
            value: value.into(),
            is_prefix: false,
            is_wildcard: false,
            boost: None,
            fuzzy: None,
        }
    }

    /// Whether the unescaped value starts with a wildcard character
    pub fn has_leading_wildcard(&self) -> bool {
        self.value.starts_with('*') || self.value.starts_with('?')
    }
}

/// A quoted phrase with optional slop and boost
#[derive(Clone, Debug, PartialEq)]
pub struct PhraseNode<'a> {
    pub span: Span,
    pub content: Cow<'a, str>,
    pub slop: Option<u32>,
    pub boost: Option<f32>,
}

/// A `/…/` regular expression with optional boost
#[derive(Clone, Debug, PartialEq)]
pub struct RegexNode<'a> {
    pub span: Span,
    pub pattern: Cow<'a, str>,
    pub boost: Option<f32>,
}

/// A `name:value` scope around an inner query
///
/// `original_name` is set by the field-resolution pass so later passes can
/// recover the name as written.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldNode<'a> {
    pub span: Span,
    pub name: Cow<'a, str>,
    pub original_name: Option<Cow<'a, str>>,
    pub inner: Box<QueryNode<'a>>,
}

/// A range query, bracketed (`[a TO b]`, `{a TO b}`) or short-form (`>a`)
///
/// `None` bounds are unbounded (`*` in source). `operator` records the
/// short-form comparison so rendering restores it.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeNode<'a> {
    pub span: Span,
    pub min: Option<Cow<'a, str>>,
    pub max: Option<Cow<'a, str>>,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
    pub operator: Option<CompareOp>,
    pub boost: Option<f32>,
}

/// An ordered boolean combination; always has at least one clause
#[derive(Clone, Debug, PartialEq)]
pub struct BooleanNode<'a> {
    pub span: Span,
    pub clauses: Vec<Clause<'a>>,
}

/// One member of a boolean combination
#[derive(Clone, Debug, PartialEq)]
pub struct Clause<'a> {
    pub occur: Occur,
    pub operator: ClauseOperator,
    pub node: QueryNode<'a>,
}

/// A parenthesized group with optional boost
#[derive(Clone, Debug, PartialEq)]
pub struct GroupNode<'a> {
    pub span: Span,
    pub inner: Box<QueryNode<'a>>,
    pub boost: Option<f32>,
}

/// `NOT x` — kept distinct from a MustNot clause so `NOT x` and `-x`
/// round-trip to their original spellings
#[derive(Clone, Debug, PartialEq)]
pub struct NotNode<'a> {
    pub span: Span,
    pub inner: Box<QueryNode<'a>>,
}

/// Field-presence check: `_exists_:f` or the `f:*` shorthand
#[derive(Clone, Debug, PartialEq)]
pub struct ExistsNode<'a> {
    pub span: Span,
    pub field: Cow<'a, str>,
    pub original_field: Option<Cow<'a, str>>,
    /// true for `_exists_:f`, false for `f:*`
    pub is_exists_syntax: bool,
}

/// Field-absence check: `_missing_:f`
#[derive(Clone, Debug, PartialEq)]
pub struct MissingNode<'a> {
    pub span: Span,
    pub field: Cow<'a, str>,
    pub original_field: Option<Cow<'a, str>>,
}

/// The literal `*:*`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchAllNode {
    pub span: Span,
}

/// A run of bare terms kept together when split-on-whitespace is off
#[derive(Clone, Debug, PartialEq)]
pub struct MultiTermNode<'a> {
    pub span: Span,
    pub terms: Vec<Cow<'a, str>>,
    pub joined: Cow<'a, str>,
}
