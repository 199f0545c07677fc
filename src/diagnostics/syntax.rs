//! YAML syntax diagnostics over templated text
//!
//! The raw text is not valid YAML while it contains template expressions,
//! so a line-preserving preprocessing step rewrites it first: lines that
//! are nothing but expressions are blanked (control lines produce no
//! output, and a bare placeholder scalar would itself be a syntax error),
//! and inline expressions are replaced with plain placeholders. Error
//! positions from the parser then line up with the original document.

use serde::Deserialize;

use crate::scan;

use super::DiagnosticCollector;

/// Rewrite templated text into parseable YAML, preserving line count.
pub fn preprocess_template(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut counter = 0usize;

    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if scan::is_expression_only_line(line) {
            continue;
        }
        let spans = scan::expressions_in_line(line);
        if spans.is_empty() {
            out.push_str(line);
            continue;
        }
        let mut cursor = 0usize;
        for span in &spans {
            out.push_str(&line[cursor..span.start]);
            out.push_str(&format!("__TPL_{:03}__", counter));
            counter += 1;
            cursor = span.end;
        }
        out.push_str(&line[cursor..]);
    }
    out
}

/// Parse the preprocessed text and collect syntax errors. Multi-document
/// streams are parsed document by document so a `---`-separated manifest
/// reports errors per segment.
pub fn collect_syntax_diagnostics(text: &str, collector: &mut DiagnosticCollector) {
    let preprocessed = preprocess_template(text);

    for document in serde_yaml::Deserializer::from_str(&preprocessed) {
        if let Err(error) = serde_yaml::Value::deserialize(document) {
            let message = error.to_string();
            let (line, column) = extract_error_position(&message);
            collector.add_syntax_error(clean_error_message(&message), line, column);
        }
    }
}

/// Extract line and column from a parser error message, which carries
/// position info in the form "... at line X column Y".
fn extract_error_position(message: &str) -> (u32, u32) {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        static ref POSITION_RE: Regex = Regex::new(r"at line (\d+) column (\d+)").unwrap();
    }

    if let Some(caps) = POSITION_RE.captures(message) {
        let line: u32 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        let column: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        // Parser positions are 1-indexed, LSP positions 0-indexed
        (line.saturating_sub(1), column.saturating_sub(1))
    } else {
        (0, 0)
    }
}

/// Strip the trailing position info; the diagnostic range carries it.
fn clean_error_message(message: &str) -> String {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        static ref POSITION_SUFFIX_RE: Regex = Regex::new(r"\s+at line \d+ column \d+$").unwrap();
    }

    POSITION_SUFFIX_RE.replace(message, "").to_string()
}
