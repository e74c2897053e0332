//! Lexer for query string syntax
//!
//! Tokenizes Lucene-style query strings into a flat token sequence. The
//! lexer is single-pass, forward-only, and zero-copy: token values are
//! slices of the source buffer, materialized into owned strings only when a
//! backslash escape had to be decoded.
//!
//! The lexer never fails. Unknown characters become [`TokenKind::Invalid`]
//! tokens with a recoverable error attached, unterminated quoted strings and
//! regexes run to end of input, and the stream always terminates with a
//! zero-length [`TokenKind::EndOfFile`] token.

use std::borrow::Cow;

use crate::error::ParseError;
use crate::position::Span;
use crate::token::{Token, TokenKind};

/// Lexer over a caller-owned source buffer
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    column: u32,
    errors: Vec<ParseError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    /// Tokenize the whole input, including the terminating end-of-file token
    pub fn tokenize(source: &'a str) -> (Vec<Token<'a>>, Vec<ParseError>) {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::EndOfFile;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, lexer.errors)
    }

    /// Recoverable errors collected so far
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Token<'a> {
        let start = self.pos;
        let line = self.line;
        let column = self.column;

        let Some(ch) = self.peek() else {
            return Token::verbatim(
                TokenKind::EndOfFile,
                "",
                Span::new(start, start, line, column),
            );
        };

        match ch {
            c if c.is_whitespace() => {
                while self.peek().is_some_and(|c| c.is_whitespace()) {
                    self.bump();
                }
                self.verbatim_from(TokenKind::Whitespace, start, line, column)
            }
            '"' => self.read_delimited(TokenKind::QuotedString, '"', start, line, column),
            '/' => self.read_delimited(TokenKind::Regex, '/', start, line, column),
            ':' => self.single(TokenKind::Colon, start, line, column),
            '(' => self.single(TokenKind::LeftParen, start, line, column),
            ')' => self.single(TokenKind::RightParen, start, line, column),
            '[' => self.single(TokenKind::LeftBracket, start, line, column),
            ']' => self.single(TokenKind::RightBracket, start, line, column),
            '{' => self.single(TokenKind::LeftBrace, start, line, column),
            '}' => self.single(TokenKind::RightBrace, start, line, column),
            '+' => self.single(TokenKind::Plus, start, line, column),
            '-' => self.single(TokenKind::Minus, start, line, column),
            '~' => self.single(TokenKind::Tilde, start, line, column),
            '^' => self.single(TokenKind::Caret, start, line, column),
            '!' => self.single(TokenKind::Not, start, line, column),
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    self.verbatim_from(TokenKind::GreaterThanOrEqual, start, line, column)
                } else {
                    self.verbatim_from(TokenKind::GreaterThan, start, line, column)
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    self.verbatim_from(TokenKind::LessThanOrEqual, start, line, column)
                } else {
                    self.verbatim_from(TokenKind::LessThan, start, line, column)
                }
            }
            '&' => self.double_or_invalid(TokenKind::And, '&', start, line, column),
            '|' => self.double_or_invalid(TokenKind::Or, '|', start, line, column),
            _ => self.read_term(start, line, column),
        }
    }

    fn single(&mut self, kind: TokenKind, start: usize, line: u32, column: u32) -> Token<'a> {
        self.bump();
        self.verbatim_from(kind, start, line, column)
    }

    /// `&&`/`||` operators; a lone `&` or `|` is not accepted as anything
    fn double_or_invalid(
        &mut self,
        kind: TokenKind,
        ch: char,
        start: usize,
        line: u32,
        column: u32,
    ) -> Token<'a> {
        self.bump();
        if self.peek() == Some(ch) {
            self.bump();
            return self.verbatim_from(kind, start, line, column);
        }
        let token = self.verbatim_from(TokenKind::Invalid, start, line, column);
        self.errors.push(ParseError::at(
            format!("Unexpected character '{ch}'"),
            token.span,
        ));
        token
    }

    /// Read a `"…"` or `/…/` literal. A missing closing delimiter is
    /// tolerated; the token runs to end of input and the parser decides
    /// whether that is acceptable.
    fn read_delimited(
        &mut self,
        kind: TokenKind,
        delim: char,
        start: usize,
        line: u32,
        column: u32,
    ) -> Token<'a> {
        self.bump();
        let content_start = self.pos;
        let mut decoded: Option<String> = None;
        let mut content_end = self.pos;

        loop {
            match self.peek() {
                None => {
                    content_end = self.pos;
                    break;
                }
                Some(c) if c == delim => {
                    content_end = self.pos;
                    self.bump();
                    break;
                }
                Some('\\') => {
                    if decoded.is_none() {
                        decoded = Some(self.source[content_start..self.pos].to_string());
                    }
                    self.bump();
                    if let Some(escaped) = self.peek() {
                        decoded.as_mut().expect("initialized above").push(escaped);
                        self.bump();
                    }
                }
                Some(c) => {
                    if let Some(ref mut s) = decoded {
                        s.push(c);
                    }
                    self.bump();
                }
            }
        }

        let raw = &self.source[start..self.pos];
        let value = match decoded {
            Some(s) => Cow::Owned(s),
            None => Cow::Borrowed(&self.source[content_start..content_end]),
        };
        Token::new(kind, raw, value, Span::new(start, self.pos, line, column))
    }

    /// Read a maximal run of term characters, with `\X` escapes
    ///
    /// A `:` stays inside the term only when flanked by digits on both
    /// sides (time-of-day values such as `12:30:00`), and `||` stays inside
    /// only directly after a digit (the date-math anchor separator in
    /// `2024-01-01||/M`). Everything else from the operator set terminates
    /// the term.
    fn read_term(&mut self, start: usize, line: u32, column: u32) -> Token<'a> {
        let mut decoded: Option<String> = None;
        let mut prev: Option<char> = None;

        loop {
            let Some(c) = self.peek() else { break };
            match c {
                '\\' => {
                    if decoded.is_none() {
                        decoded = Some(self.source[start..self.pos].to_string());
                    }
                    self.bump();
                    if let Some(escaped) = self.peek() {
                        decoded.as_mut().expect("initialized above").push(escaped);
                        self.bump();
                        prev = Some(escaped);
                    }
                }
                ':' => {
                    let flanked = prev.is_some_and(|p| p.is_ascii_digit())
                        && self.peek_at(1).is_some_and(|n| n.is_ascii_digit());
                    if !flanked {
                        break;
                    }
                    self.push_decoded(&mut decoded, c);
                    self.bump();
                    prev = Some(c);
                }
                '|' => {
                    // date anchors end in a digit or a zone designator
                    let anchored = prev
                        .is_some_and(|p| p.is_ascii_digit() || p == 'Z' || p == 'z')
                        && self.peek_at(1) == Some('|');
                    if !anchored {
                        break;
                    }
                    self.push_decoded(&mut decoded, '|');
                    self.push_decoded(&mut decoded, '|');
                    self.bump();
                    self.bump();
                    prev = Some('|');
                }
                c if is_term_terminator(c) => break,
                c => {
                    self.push_decoded(&mut decoded, c);
                    self.bump();
                    prev = Some(c);
                }
            }
        }

        let raw = &self.source[start..self.pos];
        let span = Span::new(start, self.pos, line, column);

        // Reserved words are promoted only in their exact uppercase form
        // and only when no escape was involved.
        if decoded.is_none() {
            let kind = match raw {
                "AND" => Some(TokenKind::And),
                "OR" => Some(TokenKind::Or),
                "NOT" => Some(TokenKind::Not),
                "TO" => Some(TokenKind::To),
                _ => None,
            };
            if let Some(kind) = kind {
                return Token::verbatim(kind, raw, span);
            }
        }

        let kind = classify_term(raw);
        let value = match decoded {
            Some(s) => Cow::Owned(s),
            None => Cow::Borrowed(raw),
        };
        Token::new(kind, raw, value, span)
    }

    fn push_decoded(&self, decoded: &mut Option<String>, c: char) {
        if let Some(s) = decoded {
            s.push(c);
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    /// Peek `n` characters past the current one
    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn verbatim_from(&self, kind: TokenKind, start: usize, line: u32, column: u32) -> Token<'a> {
        Token::verbatim(
            kind,
            &self.source[start..self.pos],
            Span::new(start, self.pos, line, column),
        )
    }
}

/// Characters that end a term. `+`, `-`, `*`, `?`, `/`, `.` and `@` are all
/// legal inside terms (dates, date math, wildcards, include names); `:` and
/// `|` are handled contextually in `read_term`.
fn is_term_terminator(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '(' | ')' | '[' | ']' | '{' | '}' | ':' | '~' | '^' | '>' | '<' | '!' | '&' | '|'
        )
}

/// Classify a raw term slice as plain, prefix, or wildcard
///
/// Escaped wildcard characters (`\*`, `\?`) do not count. A term that is
/// exactly `*` is a wildcard, not a prefix: a prefix needs a stem.
fn classify_term(raw: &str) -> TokenKind {
    let mut stars = 0usize;
    let mut questions = 0usize;
    let mut last_unescaped_star = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        last_unescaped_star = false;
        match c {
            '\\' => {
                chars.next();
            }
            '*' => {
                stars += 1;
                last_unescaped_star = true;
            }
            '?' => questions += 1,
            _ => {}
        }
    }

    if stars == 0 && questions == 0 {
        TokenKind::Term
    } else if stars == 1 && questions == 0 && last_unescaped_star && raw != "*" {
        TokenKind::Prefix
    } else {
        TokenKind::Wildcard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let (tokens, _) = Lexer::tokenize(input);
        tokens.iter().map(|t| t.kind).collect()
    }

    fn non_trivia(input: &str) -> Vec<Token<'_>> {
        let (tokens, _) = Lexer::tokenize(input);
        tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::EndOfFile))
            .collect()
    }

    #[test]
    fn test_simple_term() {
        let tokens = non_trivia("hello");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Term);
        assert_eq!(tokens[0].value, "hello");
    }

    #[test]
    fn test_field_value() {
        let tokens = non_trivia("title:rust");
        assert_eq!(tokens[0].value, "title");
        assert_eq!(tokens[1].kind, TokenKind::Colon);
        assert_eq!(tokens[2].value, "rust");
    }

    #[test]
    fn test_reserved_words_exact_case() {
        assert_eq!(
            kinds("a AND b"),
            vec![
                TokenKind::Term,
                TokenKind::Whitespace,
                TokenKind::And,
                TokenKind::Whitespace,
                TokenKind::Term,
                TokenKind::EndOfFile
            ]
        );
        // lowercase stays a plain term
        let tokens = non_trivia("a and b");
        assert_eq!(tokens[1].kind, TokenKind::Term);
        assert_eq!(tokens[1].value, "and");
    }

    #[test]
    fn test_symbolic_operators() {
        let tokens = non_trivia("a && b || !c");
        assert_eq!(tokens[1].kind, TokenKind::And);
        assert_eq!(tokens[3].kind, TokenKind::Or);
        assert_eq!(tokens[4].kind, TokenKind::Not);
    }

    #[test]
    fn test_comparison_operators() {
        let tokens = non_trivia("age:>=21");
        assert_eq!(tokens[2].kind, TokenKind::GreaterThanOrEqual);
        let tokens = non_trivia("age:<21");
        assert_eq!(tokens[2].kind, TokenKind::LessThan);
    }

    #[test]
    fn test_quoted_string_strips_quotes() {
        let tokens = non_trivia("\"hello world\"");
        assert_eq!(tokens[0].kind, TokenKind::QuotedString);
        assert_eq!(tokens[0].value, "hello world");
        assert_eq!(tokens[0].raw, "\"hello world\"");
    }

    #[test]
    fn test_quoted_string_escapes_decode_lazily() {
        let tokens = non_trivia("\"plain\"");
        assert!(matches!(tokens[0].value, Cow::Borrowed(_)));

        let tokens = non_trivia(r#""say \"hi\"""#);
        assert!(matches!(tokens[0].value, Cow::Owned(_)));
        assert_eq!(tokens[0].value, "say \"hi\"");
    }

    #[test]
    fn test_unterminated_quoted_string_runs_to_eof() {
        let (tokens, errors) = Lexer::tokenize("\"unterminated");
        assert_eq!(tokens[0].kind, TokenKind::QuotedString);
        assert_eq!(tokens[0].value, "unterminated");
        assert_eq!(tokens[0].span.end, 13);
        // not the lexer's problem
        assert!(errors.is_empty());
    }

    #[test]
    fn test_regex_literal() {
        let tokens = non_trivia("name:/joh?n/");
        assert_eq!(tokens[2].kind, TokenKind::Regex);
        assert_eq!(tokens[2].value, "joh?n");
    }

    #[test]
    fn test_prefix_term() {
        let tokens = non_trivia("prog*");
        assert_eq!(tokens[0].kind, TokenKind::Prefix);
        assert_eq!(tokens[0].value, "prog*");
    }

    #[test]
    fn test_wildcard_term() {
        assert_eq!(non_trivia("p*ing")[0].kind, TokenKind::Wildcard);
        assert_eq!(non_trivia("te?t")[0].kind, TokenKind::Wildcard);
        assert_eq!(non_trivia("*suffix")[0].kind, TokenKind::Wildcard);
    }

    #[test]
    fn test_bare_star_is_wildcard_not_prefix() {
        assert_eq!(non_trivia("*")[0].kind, TokenKind::Wildcard);
    }

    #[test]
    fn test_escaped_star_is_plain_term() {
        let tokens = non_trivia(r"foo\*");
        assert_eq!(tokens[0].kind, TokenKind::Term);
        assert_eq!(tokens[0].value, "foo*");
        assert_eq!(tokens[0].raw, r"foo\*");
    }

    #[test]
    fn test_time_of_day_colon_stays_in_term() {
        let tokens = non_trivia("12:30:00");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, "12:30:00");
    }

    #[test]
    fn test_non_digit_colon_terminates_term() {
        let tokens = non_trivia("title:a1:2b");
        // title | : | a1:2b — the second colon is digit-flanked
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2].value, "a1:2b");
    }

    #[test]
    fn test_date_math_anchor_separator() {
        let tokens = non_trivia("2024-01-01||/M");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, "2024-01-01||/M");

        let tokens = non_trivia("2024-06-15T10:00:00Z||+1h");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, "2024-06-15T10:00:00Z||+1h");
    }

    #[test]
    fn test_or_between_terms_is_not_absorbed() {
        let tokens = non_trivia("a||b");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].kind, TokenKind::Or);
    }

    #[test]
    fn test_date_math_now() {
        let tokens = non_trivia("created:[now-7d TO now/d]");
        let values: Vec<_> = tokens.iter().map(|t| t.value.as_ref()).collect();
        assert_eq!(
            values,
            vec!["created", ":", "[", "now-7d", "TO", "now/d", "]"]
        );
    }

    #[test]
    fn test_include_name() {
        let tokens = non_trivia("@include:mysaved");
        assert_eq!(tokens[0].value, "@include");
        assert_eq!(tokens[1].kind, TokenKind::Colon);
        assert_eq!(tokens[2].value, "mysaved");
    }

    #[test]
    fn test_invalid_character_recovers() {
        let (tokens, errors) = Lexer::tokenize("a & b");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::Invalid));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].offset, 2);
        // lexing continued past the bad character
        assert_eq!(tokens.last().unwrap().kind, TokenKind::EndOfFile);
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = Lexer::tokenize("ab\ncd");
        assert_eq!(tokens[0].span, Span::new(0, 2, 1, 1));
        assert_eq!(tokens[1].span, Span::new(2, 3, 1, 3));
        assert_eq!(tokens[2].span, Span::new(3, 5, 2, 1));
    }

    #[test]
    fn test_totality() {
        for input in [
            "title:hello AND status:active",
            "\"unterminated",
            "a & b || c",
            "price:[100 TO *}",
            "  \n  ",
            "",
        ] {
            let (tokens, _) = Lexer::tokenize(input);
            let total: usize = tokens.iter().map(|t| t.span.len()).sum();
            assert_eq!(total, input.len(), "input: {input:?}");
            assert_eq!(tokens.last().unwrap().kind, TokenKind::EndOfFile);
        }
    }

    #[test]
    fn test_minus_and_plus_inside_terms() {
        let tokens = non_trivia("2024-01-15");
        assert_eq!(tokens.len(), 1);
        let tokens = non_trivia("-excluded");
        assert_eq!(tokens[0].kind, TokenKind::Minus);
        assert_eq!(tokens[1].value, "excluded");
    }
}
