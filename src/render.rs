//! Canonical query-string rendering
//!
//! Renders any AST back to query-string form. The output is a fixed point:
//! re-parsing a rendered string with the same configuration and rendering
//! again yields the identical string. Whitespace is normalized to single
//! spaces; everything else preserves the original spelling (short-form
//! range operators, `~` vs `~N`, `NOT x` vs `-x`, `_exists_:f` vs `f:*`).

use crate::ast::{
    BooleanNode, Clause, ClauseOperator, Document, Occur, QueryNode, RangeNode,
};
use crate::config::QueryOperator;

/// Renders ASTs to canonical query strings
///
/// The builder needs the parser's default operator to know which `+`
/// prefixes are redundant: a Must clause inside a chain that is already
/// AND-combined re-parses identically without the prefix.
#[derive(Clone, Debug, Default)]
pub struct QueryStringBuilder {
    default_operator: QueryOperator,
}

impl QueryStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_operator(mut self, operator: QueryOperator) -> Self {
        self.default_operator = operator;
        self
    }

    pub fn build(&self, document: &Document<'_>) -> String {
        match &document.query {
            Some(node) => self.build_node(node),
            None => String::new(),
        }
    }

    pub fn build_node(&self, node: &QueryNode<'_>) -> String {
        let mut out = String::new();
        self.render_node(node, &mut out);
        out
    }

    fn render_node(&self, node: &QueryNode<'_>, out: &mut String) {
        match node {
            QueryNode::Term(term) => {
                out.push_str(&term.raw);
                match term.fuzzy {
                    Some(crate::ast::Fuzziness::Auto) => out.push('~'),
                    Some(crate::ast::Fuzziness::Distance(n)) => {
                        out.push('~');
                        out.push_str(&n.to_string());
                    }
                    None => {}
                }
                push_boost(term.boost, out);
            }
            QueryNode::Phrase(phrase) => {
                out.push('"');
                push_escaped(&phrase.content, '"', out);
                out.push('"');
                if let Some(slop) = phrase.slop {
                    out.push('~');
                    out.push_str(&slop.to_string());
                }
                push_boost(phrase.boost, out);
            }
            QueryNode::Regex(regex) => {
                out.push('/');
                push_escaped(&regex.pattern, '/', out);
                out.push('/');
                push_boost(regex.boost, out);
            }
            QueryNode::Field(field) => {
                out.push_str(&field.name);
                out.push(':');
                self.render_node(&field.inner, out);
            }
            QueryNode::Range(range) => self.render_range(range, out),
            QueryNode::Boolean(boolean) => self.render_boolean(boolean, out),
            QueryNode::Group(group) => {
                out.push('(');
                self.render_node(&group.inner, out);
                out.push(')');
                push_boost(group.boost, out);
            }
            QueryNode::Not(not) => {
                out.push_str("NOT ");
                self.render_node(&not.inner, out);
            }
            QueryNode::Exists(exists) => {
                if exists.is_exists_syntax {
                    out.push_str("_exists_:");
                    out.push_str(&exists.field);
                } else {
                    out.push_str(&exists.field);
                    out.push_str(":*");
                }
            }
            QueryNode::Missing(missing) => {
                out.push_str("_missing_:");
                out.push_str(&missing.field);
            }
            QueryNode::MatchAll(_) => out.push_str("*:*"),
            QueryNode::MultiTerm(multi) => out.push_str(&multi.joined),
        }
    }

    fn render_range(&self, range: &RangeNode<'_>, out: &mut String) {
        if let Some(op) = range.operator {
            out.push_str(op.as_str());
            let bound = range.min.as_deref().or(range.max.as_deref());
            if let Some(value) = bound {
                out.push_str(value);
            }
            push_boost(range.boost, out);
            return;
        }

        out.push(if range.min_inclusive { '[' } else { '{' });
        out.push_str(range.min.as_deref().unwrap_or("*"));
        out.push_str(" TO ");
        out.push_str(range.max.as_deref().unwrap_or("*"));
        out.push(if range.max_inclusive { ']' } else { '}' });
        push_boost(range.boost, out);
    }

    fn render_boolean(&self, boolean: &BooleanNode<'_>, out: &mut String) {
        for (i, clause) in boolean.clauses.iter().enumerate() {
            if i > 0 {
                out.push_str(match clause.operator {
                    ClauseOperator::And => " AND ",
                    ClauseOperator::Or => " OR ",
                    ClauseOperator::Implicit => " ",
                });
            }
            match clause.occur {
                Occur::MustNot => out.push('-'),
                Occur::Must => {
                    if self.implied_occur(&boolean.clauses, i) != Occur::Must {
                        out.push('+');
                    }
                }
                Occur::Should => {}
            }
            self.render_node(&clause.node, out);
        }
    }

    /// The occur a clause would get with no prefix written, given its
    /// position in the chain. The first clause takes its cue from the
    /// operator that follows it.
    fn implied_occur(&self, clauses: &[Clause<'_>], i: usize) -> Occur {
        if clauses.len() == 1 {
            // a lone wrapped clause has no chain to imply anything
            return Occur::Should;
        }
        let operator = if i == 0 {
            clauses[1].operator
        } else {
            clauses[i].operator
        };
        match operator {
            ClauseOperator::And => Occur::Must,
            ClauseOperator::Or => Occur::Should,
            ClauseOperator::Implicit => match self.default_operator {
                QueryOperator::And => Occur::Must,
                QueryOperator::Or => Occur::Should,
            },
        }
    }
}

/// Render with default settings
pub fn render(document: &Document<'_>) -> String {
    QueryStringBuilder::new().build(document)
}

fn push_escaped(value: &str, delim: char, out: &mut String) {
    for c in value.chars() {
        if c == delim || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn push_boost(boost: Option<f32>, out: &mut String) {
    if let Some(value) = boost {
        out.push('^');
        out.push_str(&format_boost(value));
    }
}

/// Integer boosts up to 99 print bare; everything else gets up to two
/// decimals, trailing zeros trimmed, invariant formatting
fn format_boost(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() <= 99.0 {
        return format!("{}", value as i64);
    }
    let mut s = format!("{value:.2}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}
