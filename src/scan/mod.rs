//! Line-oriented, context-aware document scanning
//!
//! The embedded template expressions make these documents invalid for a
//! strict YAML parser, so every detector works over lines instead of an AST.
//! This module holds the two shared primitives: double-brace expression
//! scanning and the context-tracking [`ScanDocument`].

mod context;
pub(crate) mod expressions;

pub use context::{
    indent_of, is_blank, is_comment, parse_key_value, trim_quotes, word_starts, KeyValue,
    LineInfo, ScanDocument, Token,
};
pub use expressions::{
    expression_at, expressions_in_line, is_control_line, is_expression_only_line,
    strip_expressions, ExpressionSpan,
};
