//! Recursive descent parser for query strings
//!
//! # Grammar
//!
//! ```text
//! query       := or_expr
//! or_expr     := and_expr (OR and_expr)*            (implicit when default=OR)
//! and_expr    := clause (AND clause)*               (implicit when default=AND)
//! clause      := ('+' | '-' | NOT)? primary
//! primary     := group | range | short_range | field_or_term
//! group       := '(' query ')' boost?
//! range       := ('[' | '{') value? TO value? (']' | '}') boost?
//! short_range := ('>' | '>=' | '<' | '<=') value boost?
//! field_or_term := name ':' value | value
//! value       := group | range | short_range | phrase | regex | term
//! term        := TERM fuzzy? boost?
//! phrase      := QUOTED slop? boost?
//! ```
//!
//! `AND` binds tighter than `OR`; parentheses override. The parser never
//! fails on malformed input: it records positioned [`ParseError`]s and
//! returns the best-effort partial AST. Every parse loop carries a
//! no-progress guard, so parsing is linear in the token count.

use std::borrow::Cow;

use tracing::debug;

use crate::ast::{
    BooleanNode, Clause, ClauseOperator, CompareOp, Document, ExistsNode, FieldNode, Fuzziness,
    GroupNode, MatchAllNode, MissingNode, MultiTermNode, NotNode, Occur, PhraseNode, QueryNode,
    RangeNode, RegexNode, TermNode,
};
use crate::config::{ParserSettings, QueryOperator};
use crate::error::{ParseError, Result, SquallError};
use crate::lexer::Lexer;
use crate::position::Span;
use crate::token::{Token, TokenKind};

/// Outcome of a parse: the (possibly partial) document plus every
/// recoverable error encountered along the way
#[derive(Clone, Debug)]
pub struct ParseResult<'a> {
    pub document: Document<'a>,
    pub errors: Vec<ParseError>,
}

impl<'a> ParseResult<'a> {
    /// True when no lexical or syntactic error was recorded
    ///
    /// Semantic problems (unresolved fields, policy violations) live on the
    /// visitor context's validation result, not here.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parser for Lucene-style query strings
///
/// Holds only configuration; `parse` may be called repeatedly and from
/// multiple threads, each call working over its own token buffer.
#[derive(Clone, Debug, Default)]
pub struct QueryStringParser {
    settings: ParserSettings,
}

impl QueryStringParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ParserSettings) -> Self {
        Self { settings }
    }

    /// Set the operator applied between clauses with no explicit operator
    pub fn with_default_operator(mut self, operator: QueryOperator) -> Self {
        self.settings.default_operator = operator;
        self
    }

    /// When false, runs of bare terms are combined into a single
    /// multi-term node instead of separate clauses
    pub fn with_split_on_whitespace(mut self, split: bool) -> Self {
        self.settings.split_on_whitespace = split;
        self
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    /// Parse a query string into a document plus accumulated errors
    pub fn parse<'a>(&self, source: &'a str) -> ParseResult<'a> {
        debug!(len = source.len(), "parsing query string");
        let (tokens, errors) = Lexer::tokenize(source);
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            last_end: 0,
            depth: 0,
            settings: self.settings.clone(),
            errors,
        };
        let document = parser.parse_document();
        ParseResult {
            document,
            errors: parser.errors,
        }
    }

    /// Like [`parse`](Self::parse), but converts a parser panic into an
    /// error result instead of unwinding into the caller
    pub fn try_parse<'a>(&self, source: &'a str) -> Result<ParseResult<'a>> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.parse(source)))
            .map_err(|_| SquallError::Internal("query parser panicked".to_string()))
    }
}

/// Parse with default settings
pub fn parse(source: &str) -> ParseResult<'_> {
    QueryStringParser::new().parse(source)
}

/// Tokenize-only entry point for tools that want the raw token stream
pub fn tokenize(source: &str) -> (Vec<Token<'_>>, Vec<ParseError>) {
    Lexer::tokenize(source)
}

/// A clause before its occur is finalized: `None` means no `+`/`-` was
/// written and the level's implied occur applies
type PendingClause<'a> = (Option<Occur>, ClauseOperator, QueryNode<'a>);

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    /// End offset of the last consumed non-whitespace token; modifier
    /// tokens (`~`, `^`) only attach when directly adjacent to this
    last_end: usize,
    depth: usize,
    settings: ParserSettings,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn parse_document(&mut self) -> Document<'a> {
        let full = Span::new(0, self.source.len(), 1, 1);
        self.skip_ws();
        if self.direct().kind == TokenKind::EndOfFile {
            return Document {
                span: full,
                query: None,
            };
        }

        let mut query = self.parse_query_level();

        // Leftover tokens the grammar could not place: report, skip one,
        // and try to fold whatever parses after it back into the query.
        loop {
            self.skip_ws();
            let tok = self.direct().clone();
            if tok.kind == TokenKind::EndOfFile {
                break;
            }
            if tok.kind != TokenKind::Invalid {
                self.error_at(tok.span, format!("Unexpected {}", tok.kind));
            }
            self.advance();
            self.skip_ws();
            if self.can_start_clause() {
                if let Some(more) = self.parse_query_level() {
                    query = Some(self.merge_recovered(query, more));
                }
            }
        }

        Document { span: full, query }
    }

    /// One full precedence level: multi-term combining, then the OR grammar,
    /// then the top-of-level rule that preserves a lone `+`/`-` clause by
    /// wrapping it in a single-clause boolean
    fn parse_query_level(&mut self) -> Option<QueryNode<'a>> {
        if let Some(multi) = self.try_multi_term() {
            return Some(multi);
        }
        let (occur, node) = self.parse_or()?;
        match occur {
            Some(occ @ (Occur::Must | Occur::MustNot)) => {
                let span = node.span();
                Some(QueryNode::Boolean(BooleanNode {
                    span,
                    clauses: vec![Clause {
                        occur: occ,
                        operator: ClauseOperator::Implicit,
                        node,
                    }],
                }))
            }
            _ => Some(node),
        }
    }

    fn parse_or(&mut self) -> Option<(Option<Occur>, QueryNode<'a>)> {
        let (occur, node) = self.parse_and()?;
        let mut parts: Vec<PendingClause<'a>> = vec![(occur, ClauseOperator::Implicit, node)];

        loop {
            self.skip_ws();
            let before = self.pos;
            let operator = if self.direct().kind == TokenKind::Or {
                self.advance();
                ClauseOperator::Or
            } else if self.settings.default_operator == QueryOperator::Or
                && self.can_start_clause()
            {
                ClauseOperator::Implicit
            } else {
                break;
            };

            if let Some((occur, node)) = self.parse_and() {
                parts.push((occur, operator, node));
            }
            if self.pos == before {
                break;
            }
        }

        Some(finalize_level(parts, Occur::Should))
    }

    fn parse_and(&mut self) -> Option<(Option<Occur>, QueryNode<'a>)> {
        let (occur, node) = self.parse_clause()?;
        let mut parts: Vec<PendingClause<'a>> = vec![(occur, ClauseOperator::Implicit, node)];

        loop {
            self.skip_ws();
            let before = self.pos;
            let operator = if self.direct().kind == TokenKind::And {
                self.advance();
                ClauseOperator::And
            } else if self.settings.default_operator == QueryOperator::And
                && self.can_start_clause()
            {
                ClauseOperator::Implicit
            } else {
                break;
            };

            if let Some((occur, node)) = self.parse_clause() {
                parts.push((occur, operator, node));
            }
            if self.pos == before {
                break;
            }
        }

        Some(finalize_level(parts, Occur::Must))
    }

    /// clause := ('+' | '-' | NOT)? primary
    fn parse_clause(&mut self) -> Option<(Option<Occur>, QueryNode<'a>)> {
        self.skip_ws();
        match self.direct().kind {
            TokenKind::Plus => {
                self.advance();
                let node = self.parse_primary()?;
                Some((Some(Occur::Must), node))
            }
            TokenKind::Minus => {
                self.advance();
                let node = self.parse_primary()?;
                Some((Some(Occur::MustNot), node))
            }
            TokenKind::Not => {
                let not_span = self.direct().span;
                self.advance();
                let inner = self.parse_primary()?;
                let span = not_span.cover(inner.span());
                Some((
                    None,
                    QueryNode::Not(NotNode {
                        span,
                        inner: Box::new(inner),
                    }),
                ))
            }
            _ => self.parse_primary().map(|node| (None, node)),
        }
    }

    fn parse_primary(&mut self) -> Option<QueryNode<'a>> {
        self.skip_ws();
        let tok = self.direct().clone();
        match tok.kind {
            TokenKind::LeftParen => self.parse_group(),
            TokenKind::LeftBracket | TokenKind::LeftBrace => self.parse_bracket_range(),
            k if k.is_comparison() => self.parse_short_range(),
            TokenKind::QuotedString => Some(self.parse_phrase()),
            TokenKind::Regex => Some(self.parse_regex()),
            k if k.is_term_like() => self.parse_term_or_field(),
            TokenKind::EndOfFile => {
                self.error_at(tok.span, "Unexpected end of input");
                None
            }
            // Closers belong to an enclosing production or are reported as
            // leftovers at the document level.
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => None,
            TokenKind::Invalid => {
                // already reported by the lexer
                self.advance();
                None
            }
            _ => {
                self.error_at(tok.span, format!("Unexpected {}", tok.kind));
                self.advance();
                None
            }
        }
    }

    fn parse_group(&mut self) -> Option<QueryNode<'a>> {
        let open = self.direct().span;
        self.advance();

        if self.depth >= self.settings.max_nesting_depth {
            self.error_at(open, "Group nesting too deep");
            self.skip_balanced_group();
            return None;
        }

        self.depth += 1;
        let inner = self.parse_query_level();
        self.depth -= 1;

        self.skip_ws();
        if self.direct().kind == TokenKind::RightParen {
            self.advance();
        } else {
            self.error_at(self.direct().span, "Expected ')'");
        }
        let boost = self.parse_boost_opt();

        match inner {
            Some(node) => Some(QueryNode::Group(GroupNode {
                span: self.span_to_here(open),
                inner: Box::new(node),
                boost,
            })),
            None => {
                self.error_at(open, "Expected query after '('");
                None
            }
        }
    }

    /// Consume tokens until the group that just overflowed the nesting cap
    /// is balanced again
    fn skip_balanced_group(&mut self) {
        let mut level = 1usize;
        loop {
            match self.direct().kind {
                TokenKind::EndOfFile => break,
                TokenKind::LeftParen => level += 1,
                TokenKind::RightParen => {
                    level -= 1;
                    if level == 0 {
                        self.advance();
                        break;
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_bracket_range(&mut self) -> Option<QueryNode<'a>> {
        let open = self.direct().clone();
        self.advance();
        let min_inclusive = open.kind == TokenKind::LeftBracket;

        let min = self.parse_range_value();
        self.skip_ws();
        if self.direct().kind == TokenKind::To {
            self.advance();
        } else {
            self.error_at(self.direct().span, "Expected TO in range");
        }
        let max = self.parse_range_value();

        self.skip_ws();
        let max_inclusive = match self.direct().kind {
            TokenKind::RightBracket => {
                self.advance();
                true
            }
            TokenKind::RightBrace => {
                self.advance();
                false
            }
            _ => {
                self.error_at(self.direct().span, "Expected ']' or '}' to close range");
                min_inclusive
            }
        };
        let boost = self.parse_boost_opt();

        Some(QueryNode::Range(RangeNode {
            span: self.span_to_here(open.span),
            min,
            max,
            min_inclusive,
            max_inclusive,
            operator: None,
            boost,
        }))
    }

    fn parse_short_range(&mut self) -> Option<QueryNode<'a>> {
        let op_tok = self.direct().clone();
        self.advance();
        let value = self.parse_range_value();
        let boost = self.parse_boost_opt();

        let (operator, min, max, min_inclusive, max_inclusive) = match op_tok.kind {
            TokenKind::GreaterThan => (CompareOp::Gt, value, None, false, false),
            TokenKind::GreaterThanOrEqual => (CompareOp::Gte, value, None, true, false),
            TokenKind::LessThan => (CompareOp::Lt, None, value, false, false),
            TokenKind::LessThanOrEqual => (CompareOp::Lte, None, value, false, true),
            _ => unreachable!("caller checked is_comparison"),
        };

        Some(QueryNode::Range(RangeNode {
            span: self.span_to_here(op_tok.span),
            min,
            max,
            min_inclusive,
            max_inclusive,
            operator: Some(operator),
            boost,
        }))
    }

    /// One side of a range. `*` means unbounded and becomes `None`; a
    /// missing value records an error and also leaves the bound empty.
    fn parse_range_value(&mut self) -> Option<Cow<'a, str>> {
        self.skip_ws();
        let tok = self.direct().clone();
        match tok.kind {
            k if k.is_term_like() => {
                self.advance();
                if tok.raw == "*" {
                    None
                } else {
                    Some(tok.value)
                }
            }
            TokenKind::QuotedString => {
                self.advance();
                Some(tok.value)
            }
            // negative numbers: the minus lexes as an operator token
            TokenKind::Minus => {
                self.advance();
                let next = self.direct().clone();
                if next.kind.is_term_like() && next.span.start == self.last_end {
                    self.advance();
                    Some(Cow::Owned(format!("-{}", next.value)))
                } else {
                    self.error_at(tok.span, "Expected range value");
                    None
                }
            }
            _ => {
                self.error_at(tok.span, "Expected range value");
                None
            }
        }
    }

    fn parse_phrase(&mut self) -> QueryNode<'a> {
        let tok = self.direct().clone();
        self.advance();
        if !is_terminated(tok.raw, '"') {
            self.error_at(tok.span, "Unterminated quoted string");
        }
        let slop = self.parse_slop_opt();
        let boost = self.parse_boost_opt();
        QueryNode::Phrase(PhraseNode {
            span: self.span_to_here(tok.span),
            content: tok.value,
            slop,
            boost,
        })
    }

    fn parse_regex(&mut self) -> QueryNode<'a> {
        let tok = self.direct().clone();
        self.advance();
        if !is_terminated(tok.raw, '/') {
            self.error_at(tok.span, "Unterminated regex");
        }
        let boost = self.parse_boost_opt();
        QueryNode::Regex(RegexNode {
            span: self.span_to_here(tok.span),
            pattern: tok.value,
            boost,
        })
    }

    fn parse_term_or_field(&mut self) -> Option<QueryNode<'a>> {
        let name_tok = self.direct().clone();
        self.advance();

        // A colon directly after the term makes this a field query; with
        // whitespace in between the term stands alone.
        if self.direct().kind == TokenKind::Colon {
            self.advance();
            return self.parse_field_value(name_tok);
        }

        if name_tok.raw == "*" {
            return Some(QueryNode::MatchAll(MatchAllNode {
                span: name_tok.span,
            }));
        }

        Some(self.parse_term_like(name_tok))
    }

    fn parse_field_value(&mut self, name_tok: Token<'a>) -> Option<QueryNode<'a>> {
        self.skip_ws();
        let vtok = self.direct().clone();
        match vtok.kind {
            k if k.is_term_like() => {
                if name_tok.raw == "*" && vtok.raw == "*" {
                    self.advance();
                    return Some(QueryNode::MatchAll(MatchAllNode {
                        span: self.span_to_here(name_tok.span),
                    }));
                }
                if name_tok.value.eq_ignore_ascii_case("_exists_") {
                    self.advance();
                    return Some(QueryNode::Exists(ExistsNode {
                        span: self.span_to_here(name_tok.span),
                        field: vtok.value,
                        original_field: None,
                        is_exists_syntax: true,
                    }));
                }
                if name_tok.value.eq_ignore_ascii_case("_missing_") {
                    self.advance();
                    return Some(QueryNode::Missing(MissingNode {
                        span: self.span_to_here(name_tok.span),
                        field: vtok.value,
                        original_field: None,
                    }));
                }
                if name_tok.value == "@include" {
                    // fold the field form back into one term so the include
                    // pass has a single shape to match
                    self.advance();
                    let span = self.span_to_here(name_tok.span);
                    let (raw, value) = self.include_term_text(&name_tok, &vtok, span);
                    return Some(QueryNode::Term(TermNode::new(raw, value, span)));
                }
                if vtok.raw == "*" {
                    self.advance();
                    return Some(QueryNode::Exists(ExistsNode {
                        span: self.span_to_here(name_tok.span),
                        field: name_tok.value,
                        original_field: None,
                        is_exists_syntax: false,
                    }));
                }
                self.advance();
                let inner = self.parse_term_like(vtok);
                Some(self.wrap_field(name_tok, inner))
            }
            TokenKind::QuotedString => {
                let inner = self.parse_phrase();
                Some(self.wrap_field(name_tok, inner))
            }
            TokenKind::Regex => {
                let inner = self.parse_regex();
                Some(self.wrap_field(name_tok, inner))
            }
            TokenKind::LeftBracket | TokenKind::LeftBrace => {
                let inner = self.parse_bracket_range()?;
                Some(self.wrap_field(name_tok, inner))
            }
            k if k.is_comparison() => {
                let inner = self.parse_short_range()?;
                Some(self.wrap_field(name_tok, inner))
            }
            TokenKind::LeftParen => {
                let inner = self.parse_group()?;
                Some(self.wrap_field(name_tok, inner))
            }
            _ => {
                self.error_at(
                    vtok.span,
                    format!("Expected value after '{}:'", name_tok.value),
                );
                // best-effort stand-in keeps the field name in the tree
                let empty = QueryNode::Term(TermNode::new(
                    "",
                    "",
                    Span::new(vtok.span.start, vtok.span.start, vtok.span.line, vtok.span.column),
                ));
                Some(self.wrap_field(name_tok, empty))
            }
        }
    }

    /// Raw and unescaped text for a folded `@include:NAME` term, borrowing
    /// from the source when the two tokens are contiguous
    fn include_term_text(
        &self,
        name_tok: &Token<'a>,
        vtok: &Token<'a>,
        span: Span,
    ) -> (Cow<'a, str>, Cow<'a, str>) {
        let contiguous = vtok.span.start == name_tok.span.end + 1;
        let raw = if contiguous {
            Cow::Borrowed(&self.source[span.start..span.end])
        } else {
            Cow::Owned(format!("@include:{}", vtok.raw))
        };
        let value = match &vtok.value {
            Cow::Borrowed(_) if contiguous => raw.clone(),
            v => Cow::Owned(format!("@include:{}", v)),
        };
        (raw, value)
    }

    fn wrap_field(&self, name_tok: Token<'a>, inner: QueryNode<'a>) -> QueryNode<'a> {
        QueryNode::Field(FieldNode {
            span: self.span_to_here(name_tok.span),
            name: name_tok.value,
            original_name: None,
            inner: Box::new(inner),
        })
    }

    fn parse_term_like(&mut self, tok: Token<'a>) -> QueryNode<'a> {
        let mut node = TermNode::new(Cow::Borrowed(tok.raw), tok.value, tok.span);
        node.is_prefix = tok.kind == TokenKind::Prefix;
        node.is_wildcard = tok.kind == TokenKind::Wildcard;
        node.fuzzy = self.parse_fuzzy_opt();
        node.boost = self.parse_boost_opt();
        node.span = self.span_to_here(tok.span);
        QueryNode::Term(node)
    }

    /// `~` directly after a term; a directly-following integer is an
    /// explicit distance, otherwise the default sentinel is stored
    fn parse_fuzzy_opt(&mut self) -> Option<Fuzziness> {
        if !self.at_adjacent(TokenKind::Tilde) {
            return None;
        }
        self.advance();
        let next = self.direct().clone();
        if next.kind == TokenKind::Term
            && next.span.start == self.last_end
            && is_uint(next.raw)
        {
            self.advance();
            return Some(Fuzziness::Distance(next.raw.parse().unwrap_or(2)));
        }
        Some(Fuzziness::Auto)
    }

    /// `~N` directly after a phrase; unlike fuzzy, the number is required
    fn parse_slop_opt(&mut self) -> Option<u32> {
        if !self.at_adjacent(TokenKind::Tilde) {
            return None;
        }
        let tilde_span = self.direct().span;
        self.advance();
        let next = self.direct().clone();
        if next.kind == TokenKind::Term
            && next.span.start == self.last_end
            && is_uint(next.raw)
        {
            self.advance();
            return next.raw.parse().ok();
        }
        self.error_at(tilde_span, "Expected slop value after '~'");
        None
    }

    fn parse_boost_opt(&mut self) -> Option<f32> {
        if !self.at_adjacent(TokenKind::Caret) {
            return None;
        }
        let caret_span = self.direct().span;
        self.advance();
        let next = self.direct().clone();
        if next.kind == TokenKind::Term && next.span.start == self.last_end {
            if let Ok(value) = next.raw.parse::<f32>() {
                self.advance();
                return Some(value);
            }
            self.error_at(next.span, format!("Unrecognized boost value '{}'", next.raw));
            self.advance();
            return Some(1.0);
        }
        self.error_at(caret_span, "Expected boost value after '^'");
        Some(1.0)
    }

    /// Try to combine a run of bare terms into one multi-term node
    ///
    /// Only active when split-on-whitespace is off, and only when every
    /// token up to the end of the current level is a plain term: any
    /// operator, modifier, wildcard, field, or quoted value backs off to
    /// normal parsing.
    fn try_multi_term(&mut self) -> Option<QueryNode<'a>> {
        if self.settings.split_on_whitespace {
            return None;
        }
        self.skip_ws();

        let mut idx = self.pos;
        let mut term_indices = Vec::new();
        loop {
            match self.tokens[idx].kind {
                TokenKind::Whitespace => idx += 1,
                TokenKind::Term => {
                    term_indices.push(idx);
                    idx += 1;
                }
                TokenKind::EndOfFile | TokenKind::RightParen => break,
                _ => return None,
            }
        }
        if term_indices.len() < 2 {
            return None;
        }

        let first = &self.tokens[term_indices[0]];
        let last = &self.tokens[*term_indices.last().expect("non-empty")];
        let span = Span::new(
            first.span.start,
            last.span.end,
            first.span.line,
            first.span.column,
        );

        let terms: Vec<Cow<'a, str>> = term_indices
            .iter()
            .map(|&i| self.tokens[i].value.clone())
            .collect();
        let source_slice = &self.source[span.start..span.end];
        let joined_owned = terms.join(" ");
        let joined = if source_slice == joined_owned {
            Cow::Borrowed(source_slice)
        } else {
            Cow::Owned(joined_owned)
        };

        self.pos = idx;
        self.last_end = span.end;
        Some(QueryNode::MultiTerm(MultiTermNode {
            span,
            terms,
            joined,
        }))
    }

    fn merge_recovered(
        &self,
        query: Option<QueryNode<'a>>,
        more: QueryNode<'a>,
    ) -> QueryNode<'a> {
        let occur = match self.settings.default_operator {
            QueryOperator::And => Occur::Must,
            QueryOperator::Or => Occur::Should,
        };
        match query {
            None => more,
            Some(QueryNode::Boolean(mut boolean)) => {
                boolean.span = boolean.span.cover(more.span());
                boolean.clauses.push(Clause {
                    occur,
                    operator: ClauseOperator::Implicit,
                    node: more,
                });
                QueryNode::Boolean(boolean)
            }
            Some(existing) => {
                let span = existing.span().cover(more.span());
                QueryNode::Boolean(BooleanNode {
                    span,
                    clauses: vec![
                        Clause {
                            occur,
                            operator: ClauseOperator::Implicit,
                            node: existing,
                        },
                        Clause {
                            occur,
                            operator: ClauseOperator::Implicit,
                            node: more,
                        },
                    ],
                })
            }
        }
    }

    fn can_start_clause(&self) -> bool {
        let kind = self.direct().kind;
        kind.is_term_like()
            || kind.is_comparison()
            || matches!(
                kind,
                TokenKind::QuotedString
                    | TokenKind::Regex
                    | TokenKind::LeftParen
                    | TokenKind::LeftBracket
                    | TokenKind::LeftBrace
                    | TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Not
            )
    }

    fn at_adjacent(&self, kind: TokenKind) -> bool {
        let tok = self.direct();
        tok.kind == kind && tok.span.start == self.last_end
    }

    fn direct(&self) -> &Token<'a> {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) {
        let tok = &self.tokens[self.pos];
        if tok.kind != TokenKind::EndOfFile {
            if tok.kind != TokenKind::Whitespace {
                self.last_end = tok.span.end;
            }
            self.pos += 1;
        }
    }

    fn skip_ws(&mut self) {
        while self.direct().kind == TokenKind::Whitespace {
            self.pos += 1;
        }
    }

    fn span_to_here(&self, start: Span) -> Span {
        Span::new(
            start.start,
            self.last_end.max(start.end),
            start.line,
            start.column,
        )
    }

    fn error_at(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(ParseError::at(message, span));
    }
}

/// Collapse a finished precedence level: a single clause passes through
/// (its pending occur with it), multiple clauses become a boolean node with
/// unmodified clauses taking the level's implied occur
fn finalize_level<'a>(
    mut parts: Vec<PendingClause<'a>>,
    implied: Occur,
) -> (Option<Occur>, QueryNode<'a>) {
    if parts.len() == 1 {
        let (occur, _, node) = parts.remove(0);
        return (occur, node);
    }

    let span = parts
        .iter()
        .skip(1)
        .fold(parts[0].2.span(), |acc, part| acc.cover(part.2.span()));
    let clauses = parts
        .into_iter()
        .map(|(occur, operator, node)| Clause {
            occur: occur.unwrap_or(implied),
            operator,
            node,
        })
        .collect();
    (None, QueryNode::Boolean(BooleanNode { span, clauses }))
}

/// Whether a delimited literal actually has its closing delimiter (an
/// escaped final delimiter does not count)
fn is_terminated(raw: &str, delim: char) -> bool {
    if raw.len() < 2 || !raw.ends_with(delim) {
        return false;
    }
    let body = &raw[..raw.len() - delim.len_utf8()];
    let trailing_backslashes = body.chars().rev().take_while(|&c| c == '\\').count();
    trailing_backslashes % 2 == 0
}

fn is_uint(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Document<'_> {
        let result = parse(input);
        assert!(
            result.is_success(),
            "unexpected errors for {input:?}: {:?}",
            result.errors
        );
        result.document
    }

    fn root(input: &str) -> QueryNode<'_> {
        parse_ok(input).query.expect("non-empty query")
    }

    #[test]
    fn test_empty_input() {
        let result = parse("");
        assert!(result.is_success());
        assert!(result.document.is_empty());
    }

    #[test]
    fn test_whitespace_only_input() {
        let result = parse("   \n\t ");
        assert!(result.is_success());
        assert!(result.document.is_empty());
    }

    #[test]
    fn test_simple_term() {
        match root("rust") {
            QueryNode::Term(t) => {
                assert_eq!(t.value, "rust");
                assert!(!t.is_prefix);
                assert!(!t.is_wildcard);
            }
            other => panic!("expected term, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_field_term() {
        match root("title:rust") {
            QueryNode::Field(f) => {
                assert_eq!(f.name, "title");
                assert!(matches!(*f.inner, QueryNode::Term(_)));
            }
            other => panic!("expected field, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_term_followed_by_spaced_colon_is_not_a_field() {
        // "title :rust" — the colon does not attach to the term
        let result = parse("title :rust");
        assert!(!result.is_success());
    }

    #[test]
    fn test_explicit_and() {
        match root("title:hello AND status:active") {
            QueryNode::Boolean(b) => {
                assert_eq!(b.clauses.len(), 2);
                assert_eq!(b.clauses[0].occur, Occur::Must);
                assert_eq!(b.clauses[1].occur, Occur::Must);
                assert_eq!(b.clauses[1].operator, ClauseOperator::And);
                assert!(matches!(b.clauses[0].node, QueryNode::Field(_)));
            }
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        // a OR b AND c == a OR (b AND c)
        match root("a OR b AND c") {
            QueryNode::Boolean(b) => {
                assert_eq!(b.clauses.len(), 2);
                assert_eq!(b.clauses[1].operator, ClauseOperator::Or);
                match &b.clauses[1].node {
                    QueryNode::Boolean(inner) => {
                        assert_eq!(inner.clauses.len(), 2);
                        assert_eq!(inner.clauses[1].operator, ClauseOperator::And);
                    }
                    other => panic!("expected nested bool, got {}", other.node_type()),
                }
            }
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_modifier_occurs() {
        match root("+foo -bar baz") {
            QueryNode::Boolean(b) => {
                assert_eq!(b.clauses.len(), 3);
                assert_eq!(b.clauses[0].occur, Occur::Must);
                assert_eq!(b.clauses[1].occur, Occur::MustNot);
                assert_eq!(b.clauses[2].occur, Occur::Should);
            }
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_single_must_clause_keeps_boolean_wrapper() {
        match root("+required") {
            QueryNode::Boolean(b) => {
                assert_eq!(b.clauses.len(), 1);
                assert_eq!(b.clauses[0].occur, Occur::Must);
            }
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_not_is_distinct_from_must_not() {
        match root("NOT draft") {
            QueryNode::Not(n) => assert!(matches!(*n.inner, QueryNode::Term(_))),
            other => panic!("expected not, got {}", other.node_type()),
        }
        match root("-draft") {
            QueryNode::Boolean(b) => assert_eq!(b.clauses[0].occur, Occur::MustNot),
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_group_with_boost() {
        match root("(a OR b)^2") {
            QueryNode::Group(g) => {
                assert_eq!(g.boost, Some(2.0));
                assert!(matches!(*g.inner, QueryNode::Boolean(_)));
            }
            other => panic!("expected group, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_group_preserves_inner_occur_wrapper() {
        match root("(-a)") {
            QueryNode::Group(g) => match &*g.inner {
                QueryNode::Boolean(b) => {
                    assert_eq!(b.clauses.len(), 1);
                    assert_eq!(b.clauses[0].occur, Occur::MustNot);
                }
                other => panic!("expected bool inside group, got {}", other.node_type()),
            },
            other => panic!("expected group, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_missing_close_paren_recovers() {
        let result = parse("(a OR b");
        assert!(!result.is_success());
        assert!(result.errors.iter().any(|e| e.message.contains("')'")));
        match result.document.query.expect("partial ast") {
            QueryNode::Group(g) => assert!(matches!(*g.inner, QueryNode::Boolean(_))),
            other => panic!("expected group, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_range_inclusive_exclusive_mixed() {
        match root("price:[100 TO *}") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Range(r) => {
                    assert_eq!(r.min.as_deref(), Some("100"));
                    assert_eq!(r.max, None);
                    assert!(r.min_inclusive);
                    assert!(!r.max_inclusive);
                    assert_eq!(r.operator, None);
                }
                other => panic!("expected range, got {}", other.node_type()),
            },
            other => panic!("expected field, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_exclusive_range() {
        match root("year:{2020 TO 2024}") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Range(r) => {
                    assert!(!r.min_inclusive);
                    assert!(!r.max_inclusive);
                }
                _ => panic!("expected range"),
            },
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn test_short_form_range() {
        match root("age:>=21") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Range(r) => {
                    assert_eq!(r.min.as_deref(), Some("21"));
                    assert!(r.min_inclusive);
                    assert_eq!(r.operator, Some(CompareOp::Gte));
                }
                _ => panic!("expected range"),
            },
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn test_negative_range_value() {
        match root("delta:[-5 TO 5]") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Range(r) => {
                    assert_eq!(r.min.as_deref(), Some("-5"));
                    assert_eq!(r.max.as_deref(), Some("5"));
                }
                _ => panic!("expected range"),
            },
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn test_range_missing_to_recovers() {
        let result = parse("year:[2020 2024]");
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Expected TO")));
        assert!(result.document.query.is_some());
    }

    #[test]
    fn test_phrase_with_slop_and_boost() {
        match root("\"hello world\"~5^2") {
            QueryNode::Phrase(p) => {
                assert_eq!(p.content, "hello world");
                assert_eq!(p.slop, Some(5));
                assert_eq!(p.boost, Some(2.0));
            }
            other => panic!("expected phrase, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_unterminated_phrase() {
        let result = parse("\"unterminated");
        assert!(!result.is_success());
        assert_eq!(result.errors[0].offset, 0);
        match result.document.query.expect("partial ast") {
            QueryNode::Phrase(p) => assert_eq!(p.content, "unterminated"),
            other => panic!("expected phrase, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_fuzzy_sentinel_vs_explicit() {
        match root("x~") {
            QueryNode::Term(t) => assert_eq!(t.fuzzy, Some(Fuzziness::Auto)),
            _ => panic!("expected term"),
        }
        match root("x~2") {
            QueryNode::Term(t) => assert_eq!(t.fuzzy, Some(Fuzziness::Distance(2))),
            _ => panic!("expected term"),
        }
    }

    #[test]
    fn test_detached_tilde_does_not_attach() {
        // "x ~2" — the tilde is not adjacent to the term
        let result = parse("x ~2");
        assert!(!result.is_success());
    }

    #[test]
    fn test_boost_missing_value_defaults_and_errors() {
        let result = parse("rust^");
        assert!(!result.is_success());
        match result.document.query.expect("ast") {
            QueryNode::Term(t) => assert_eq!(t.boost, Some(1.0)),
            _ => panic!("expected term"),
        }
    }

    #[test]
    fn test_match_all_forms() {
        assert!(matches!(root("*:*"), QueryNode::MatchAll(_)));
        assert!(matches!(root("*"), QueryNode::MatchAll(_)));
    }

    #[test]
    fn test_exists_and_missing() {
        match root("_exists_:title") {
            QueryNode::Exists(e) => {
                assert_eq!(e.field, "title");
                assert!(e.is_exists_syntax);
            }
            other => panic!("expected exists, got {}", other.node_type()),
        }
        match root("title:*") {
            QueryNode::Exists(e) => {
                assert_eq!(e.field, "title");
                assert!(!e.is_exists_syntax);
            }
            other => panic!("expected exists, got {}", other.node_type()),
        }
        match root("_missing_:title") {
            QueryNode::Missing(m) => assert_eq!(m.field, "title"),
            other => panic!("expected missing, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_prefix_and_wildcard_terms() {
        match root("title:prog*") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Term(t) => {
                    assert!(t.is_prefix);
                    assert!(!t.is_wildcard);
                }
                _ => panic!("expected term"),
            },
            _ => panic!("expected field"),
        }
        match root("title:p*ing") {
            QueryNode::Field(f) => match &*f.inner {
                QueryNode::Term(t) => assert!(t.is_wildcard),
                _ => panic!("expected term"),
            },
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn test_field_scoped_group() {
        match root("tags:(tutorial OR guide)") {
            QueryNode::Field(f) => assert!(matches!(*f.inner, QueryNode::Group(_))),
            other => panic!("expected field, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_include_folds_to_term() {
        match root("@include:mysaved") {
            QueryNode::Term(t) => assert_eq!(t.value, "@include:mysaved"),
            other => panic!("expected term, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_default_operator_and() {
        let result = QueryStringParser::new()
            .with_default_operator(QueryOperator::And)
            .parse("rust programming");
        match result.document.query.expect("ast") {
            QueryNode::Boolean(b) => {
                assert_eq!(b.clauses.len(), 2);
                assert_eq!(b.clauses[0].occur, Occur::Must);
                assert_eq!(b.clauses[1].occur, Occur::Must);
                assert_eq!(b.clauses[1].operator, ClauseOperator::Implicit);
            }
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_multi_term_mode_combines_bare_terms() {
        let result = QueryStringParser::new()
            .with_split_on_whitespace(false)
            .parse("quick brown fox");
        match result.document.query.expect("ast") {
            QueryNode::MultiTerm(m) => {
                assert_eq!(m.terms, vec!["quick", "brown", "fox"]);
                assert_eq!(m.joined, "quick brown fox");
            }
            other => panic!("expected multi_term, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_multi_term_mode_backs_off_on_operators() {
        let result = QueryStringParser::new()
            .with_split_on_whitespace(false)
            .parse("quick AND fox");
        assert!(matches!(
            result.document.query.expect("ast"),
            QueryNode::Boolean(_)
        ));

        let result = QueryStringParser::new()
            .with_split_on_whitespace(false)
            .parse("title:quick fox");
        assert!(matches!(
            result.document.query.expect("ast"),
            QueryNode::Boolean(_)
        ));
    }

    #[test]
    fn test_multi_term_mode_inside_group() {
        let result = QueryStringParser::new()
            .with_split_on_whitespace(false)
            .parse("(quick fox) AND title:x");
        match result.document.query.expect("ast") {
            QueryNode::Boolean(b) => match &b.clauses[0].node {
                QueryNode::Group(g) => assert!(matches!(*g.inner, QueryNode::MultiTerm(_))),
                other => panic!("expected group, got {}", other.node_type()),
            },
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_leftover_tokens_recover() {
        let result = parse("a) b");
        assert!(!result.is_success());
        // both terms survive
        match result.document.query.expect("ast") {
            QueryNode::Boolean(b) => assert_eq!(b.clauses.len(), 2),
            other => panic!("expected bool, got {}", other.node_type()),
        }
    }

    #[test]
    fn test_pathological_inputs_terminate() {
        for input in [
            ")))", "^^^", "~~~", ":::", "[[[", "]]]", "TO TO TO", "AND OR NOT", "+++", "(((",
            "a:(b:(c:(", "| & |", ">>", "< <", "\"\"\"",
        ] {
            let result = parse(input);
            // must terminate and produce a result
            let _ = result.document;
        }
    }

    #[test]
    fn test_positions_sound() {
        let source = "title:hello AND status:active";
        let result = parse(source);
        fn check(node: &QueryNode<'_>, source: &str) {
            let span = node.span();
            assert!(span.start <= span.end && span.end <= source.len());
            assert!(!source[span.start..span.end].is_empty());
            match node {
                QueryNode::Field(f) => check(&f.inner, source),
                QueryNode::Boolean(b) => b.clauses.iter().for_each(|c| check(&c.node, source)),
                QueryNode::Group(g) => check(&g.inner, source),
                QueryNode::Not(n) => check(&n.inner, source),
                _ => {}
            }
        }
        check(result.document.query.as_ref().expect("ast"), source);
    }

    #[test]
    fn test_try_parse_is_infallible_for_normal_input() {
        let parser = QueryStringParser::new();
        assert!(parser.try_parse("a AND b").is_ok());
    }

    #[test]
    fn test_tokenize_entry_point() {
        let (tokens, errors) = tokenize("a AND b");
        assert!(errors.is_empty());
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::EndOfFile));
    }

    #[test]
    fn test_time_of_day_value() {
        match root("start:12:30:00") {
            QueryNode::Field(f) => {
                assert_eq!(f.name, "start");
                match &*f.inner {
                    QueryNode::Term(t) => assert_eq!(t.value, "12:30:00"),
                    _ => panic!("expected term"),
                }
            }
            _ => panic!("expected field"),
        }
    }
}
