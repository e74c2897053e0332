//! Lucene-style query string engine
//!
//! Parses query strings (with Elasticsearch extensions) into a typed AST,
//! transforms the AST through a pipeline of visitor passes, and renders it
//! back to canonical query-string form. Supports:
//! - Boolean combinations (`AND`, `OR`, `NOT`, `&&`, `||`, `!`)
//! - `+`/`-` occur modifiers
//! - Field scoping (`title:rust`, `tags:(a OR b)`)
//! - Ranges (`[10 TO 20]`, `{a TO b}`, `>=5`) and `_exists_`/`_missing_`
//! - Phrases with slop, fuzzy terms, prefix/wildcard terms, regex literals
//! - Boosts, `@include:` expansion, and date math (`now-7d`, `2024-01-01||/M`)
//!
//! # Example
//!
//! ```rust
//! let result = squall::parse("title:rust AND (tags:tutorial OR tags:guide)");
//! assert!(result.is_success());
//! assert_eq!(
//!     squall::render(&result.document),
//!     "title:rust AND (tags:tutorial OR tags:guide)"
//! );
//! ```
//!
//! Parsing never fails on malformed input: recoverable problems accumulate
//! on the [`ParseResult`] next to the best-effort partial AST. Semantic
//! checks (field policies, wildcard rules) run as visitor passes and report
//! through the context's [`ValidationResult`].

pub mod ast;
pub mod backends;
pub mod config;
pub mod datemath;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod position;
pub mod render;
pub mod token;
pub mod visitor;

pub use ast::{Document, Occur, QueryNode};
pub use config::{ParserSettings, QueryOperator};
pub use error::{ParseError, Result, SquallError};
pub use parser::{parse, tokenize, ParseResult, QueryStringParser};
pub use render::{render, QueryStringBuilder};
pub use visitor::{
    QueryVisitor, Transform, ValidationError, ValidationResult, VisitorChain, VisitorContext,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
