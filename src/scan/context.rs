//! Context-aware line scanning
//!
//! The shared primitive behind every reference detector. A [`ScanDocument`]
//! splits a document into lines once and runs a single forward scan that
//! tracks, per line, which document segment (after a `---` separator) it
//! belongs to, the segment's `kind:` value, and the enclosing workflow
//! template name. Detectors then ask position-local questions: the token
//! under a cursor, the enclosing indentation block, a corroborating sibling
//! key, or an indentation-bounded literal block.
//!
//! Scanning policies:
//! - comment lines (`#...`) never match anything;
//! - when a key occurs multiple times in a disambiguation context, the last
//!   occurrence in scan order is authoritative;
//! - literal blocks run while indentation stays strictly greater than the
//!   opening key's, ending at the first non-blank, non-comment line at or
//!   below it.

use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::{Position, Range};

use crate::document::{byte_to_utf16_col, utf16_col_to_byte};

/// Forward-scan state attached to each line
#[derive(Debug, Clone, Default)]
pub struct LineInfo {
    /// Index of the document segment (segments are separated by `---`)
    pub segment: usize,
    /// The segment's `kind:` value, if one has been seen by this line
    pub kind: Option<String>,
    /// Name of the enclosing workflow template, if inside a `templates:` list
    pub template: Option<String>,
}

/// A `key: value` line, possibly a `- key: value` list entry
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub list_item: bool,
    /// Byte offset of the key within the line
    pub key_start: usize,
    /// Byte offset of the value within the line (line end when value empty)
    pub value_start: usize,
}

/// A token under a cursor position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub line: u32,
    /// Byte offsets within the line
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Token {
    /// The token's range in editor-protocol coordinates.
    pub fn range(&self, line_text: &str) -> Range {
        Range {
            start: Position {
                line: self.line,
                character: byte_to_utf16_col(line_text, self.start),
            },
            end: Position {
                line: self.line,
                character: byte_to_utf16_col(line_text, self.end),
            },
        }
    }
}

/// A document split into lines with forward-scan state
#[derive(Debug)]
pub struct ScanDocument {
    lines: Vec<String>,
    infos: Vec<LineInfo>,
}

lazy_static! {
    // Step lists in workflow manifests nest list markers (`- - name: x`),
    // so one or more `- ` prefixes count as a single list entry.
    static ref KEY_VALUE_RE: Regex =
        Regex::new(r"^\s*((?:- )+)?([A-Za-z0-9_.\-/]+):(?:\s+(.*))?$").unwrap();
    static ref LIST_NAME_RE: Regex = Regex::new(r"^\s*- name:\s*(\S+)\s*$").unwrap();
}

/// Characters that may appear inside a reference token
fn is_token_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'_' | b'.' | b'-' | b'/' | b'$')
}

impl ScanDocument {
    /// Split the text and run the forward scan.
    pub fn new(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        let mut infos = Vec::with_capacity(lines.len());

        let mut segment = 0usize;
        let mut kind: Option<String> = None;
        let mut template: Option<String> = None;
        let mut templates_indent: Option<usize> = None;
        let mut template_entry_indent: Option<usize> = None;

        for line in &lines {
            let trimmed = line.trim();
            if trimmed == "---" || trimmed.starts_with("--- ") {
                segment += 1;
                kind = None;
                template = None;
                templates_indent = None;
                template_entry_indent = None;
                infos.push(LineInfo {
                    segment,
                    kind: None,
                    template: None,
                });
                continue;
            }

            if !is_blank(line) && !is_comment(line) {
                if let Some(kv) = parse_key_value(line) {
                    if kv.key == "kind" && !kv.list_item && indent_of(line) == 0 {
                        kind = Some(kv.value.clone());
                    }
                    if kv.key == "templates" && kv.value.is_empty() && !kv.list_item {
                        templates_indent = Some(indent_of(line));
                        template = None;
                        template_entry_indent = None;
                    } else if let Some(t_indent) = templates_indent {
                        let indent = indent_of(line);
                        if indent <= t_indent {
                            // Left the templates block
                            templates_indent = None;
                            template = None;
                            template_entry_indent = None;
                        } else if let Some(caps) = LIST_NAME_RE.captures(line) {
                            // Only `- name:` entries at the list level
                            // directly under `templates:` start a template;
                            // deeper ones belong to inputs/steps
                            let entry_indent = *template_entry_indent.get_or_insert(indent);
                            if indent == entry_indent {
                                template = Some(trim_quotes(&caps[1]).to_string());
                            }
                        }
                    }
                }
            }

            infos.push(LineInfo {
                segment,
                kind: kind.clone(),
                template: template.clone(),
            });
        }

        Self { lines, infos }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(|s| s.as_str())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn info(&self, idx: usize) -> Option<&LineInfo> {
        self.infos.get(idx)
    }

    /// The token under the cursor, quotes trimmed.
    ///
    /// Returns `None` on comment lines: comments never match.
    pub fn token_at(&self, position: Position) -> Option<Token> {
        let line = self.line(position.line as usize)?;
        if is_comment(line) {
            return None;
        }
        let byte = utf16_col_to_byte(line, position.character)?;
        let bytes = line.as_bytes();

        let mut start = byte;
        // Cursor may sit just past the token's final character
        if start >= bytes.len() || !is_token_char(bytes[start]) {
            if start == 0 || !is_token_char(bytes[start - 1]) {
                return None;
            }
            start -= 1;
        }
        while start > 0 && is_token_char(bytes[start - 1]) {
            start -= 1;
        }
        let mut end = byte.max(start);
        while end < bytes.len() && is_token_char(bytes[end]) {
            end += 1;
        }
        if start == end {
            return None;
        }

        Some(Token {
            line: position.line,
            start,
            end,
            text: line[start..end].to_string(),
        })
    }

    /// The nearest enclosing block header above a line: the closest preceding
    /// non-blank, non-comment line with strictly smaller indentation that
    /// parses as a key line. Returns (line index, key).
    pub fn enclosing_block_key(&self, line_idx: usize) -> Option<(usize, String)> {
        let indent = indent_of(self.line(line_idx)?);
        let mut threshold = indent;
        for idx in (0..line_idx).rev() {
            let line = &self.lines[idx];
            if is_blank(line) || is_comment(line) {
                continue;
            }
            let line_indent = indent_of(line);
            if line_indent < threshold {
                if let Some(kv) = parse_key_value(line) {
                    return Some((idx, kv.key));
                }
                // A narrower non-key line still tightens the walk
                threshold = line_indent;
            }
        }
        None
    }

    /// Walk `depth` levels of enclosing block headers, innermost first.
    pub fn block_chain(&self, line_idx: usize, depth: usize) -> Vec<(usize, String)> {
        let mut chain = Vec::new();
        let mut idx = line_idx;
        for _ in 0..depth {
            match self.enclosing_block_key(idx) {
                Some((header_idx, key)) => {
                    chain.push((header_idx, key.clone()));
                    idx = header_idx;
                }
                None => break,
            }
        }
        chain
    }

    /// Find `key: value` inside the indentation block opened at `header_idx`.
    ///
    /// The last occurrence in scan order is authoritative.
    pub fn find_in_block(&self, header_idx: usize, key: &str) -> Option<(usize, String)> {
        let header_indent = indent_of(self.line(header_idx)?);
        let mut found = None;
        for idx in header_idx + 1..self.lines.len() {
            let line = &self.lines[idx];
            if is_blank(line) || is_comment(line) {
                continue;
            }
            if indent_of(line) <= header_indent {
                break;
            }
            if let Some(kv) = parse_key_value(line) {
                if kv.key == key {
                    found = Some((idx, kv.value));
                }
            }
        }
        found
    }

    /// Find `key: value` within a fixed window of lines around `line_idx`.
    ///
    /// The last occurrence in scan order is authoritative.
    pub fn nearby_key_value(
        &self,
        line_idx: usize,
        key: &str,
        window: usize,
    ) -> Option<(usize, String)> {
        let start = line_idx.saturating_sub(window);
        let end = (line_idx + window + 1).min(self.lines.len());
        let mut found = None;
        for idx in start..end {
            let line = &self.lines[idx];
            if is_comment(line) {
                continue;
            }
            if let Some(kv) = parse_key_value(line) {
                if kv.key == key {
                    found = Some((idx, kv.value));
                }
            }
        }
        found
    }

    /// Collect the multi-line literal block opened by the key at
    /// `opening_idx`: subsequent lines while indentation stays strictly
    /// greater than the opening key's, stopping at the first non-blank,
    /// non-comment line at or below it.
    pub fn literal_block(&self, opening_idx: usize) -> Vec<usize> {
        let opening_indent = match self.line(opening_idx) {
            Some(l) => indent_of(l),
            None => return Vec::new(),
        };
        let mut block = Vec::new();
        for idx in opening_idx + 1..self.lines.len() {
            let line = &self.lines[idx];
            if is_blank(line) || is_comment(line) {
                block.push(idx);
                continue;
            }
            if indent_of(line) <= opening_indent {
                // Trailing blanks/comments belong to whatever follows
                while matches!(block.last(), Some(&last) if is_blank(&self.lines[last]) || is_comment(&self.lines[last]))
                {
                    block.pop();
                }
                break;
            }
            block.push(idx);
        }
        block
    }

    /// Contiguous comment lines directly above `line_idx`, joined with
    /// newlines and stripped of their `#` markers.
    pub fn leading_comment(&self, line_idx: usize) -> Option<String> {
        let mut comments = Vec::new();
        for idx in (0..line_idx).rev() {
            let line = &self.lines[idx];
            if !is_comment(line) {
                break;
            }
            let text = line.trim().trim_start_matches('#').trim();
            comments.push(text.to_string());
        }
        if comments.is_empty() {
            None
        } else {
            comments.reverse();
            Some(comments.join("\n"))
        }
    }
}

/// Leading-space count of a line. YAML forbids tabs for indentation, so
/// spaces are the only unit counted.
pub fn indent_of(line: &str) -> usize {
    line.bytes().take_while(|&b| b == b' ').count()
}

pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Parse a `key: value` or `- key: value` line.
pub fn parse_key_value(line: &str) -> Option<KeyValue> {
    let caps = KEY_VALUE_RE.captures(line)?;
    let key_match = caps.get(2)?;
    let value = caps
        .get(3)
        .map(|m| trim_quotes(m.as_str().trim()).to_string())
        .unwrap_or_default();
    let value_start = caps.get(3).map(|m| m.start()).unwrap_or(line.len());
    Some(KeyValue {
        key: key_match.as_str().to_string(),
        value,
        list_item: caps.get(1).is_some(),
        key_start: key_match.start(),
        value_start,
    })
}

/// Trim one layer of surrounding quotes.
pub fn trim_quotes(text: &str) -> &str {
    let t = text.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
        {
            return &t[1..t.len() - 1];
        }
    }
    t
}

/// Byte offsets of word-token starts on a line; candidate cursor positions
/// for corpus re-scans.
pub fn word_starts(line: &str) -> Vec<usize> {
    lazy_static! {
        static ref WORD_RE: Regex = Regex::new(r"[A-Za-z0-9_][A-Za-z0-9_.\-/]*").unwrap();
    }
    WORD_RE.find_iter(line).map(|m| m.start()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = "\
apiVersion: argoproj.io/v1alpha1
kind: Workflow
metadata:
  name: demo
spec:
  templates:
    - name: main
      inputs:
        parameters:
          - name: msg
            default: hello
      container:
        image: alpine
    - name: helper
      script:
        image: python
";

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_forward_scan_kind_and_template() {
        let doc = ScanDocument::new(WORKFLOW);
        assert_eq!(doc.info(0).unwrap().kind, None);
        assert_eq!(doc.info(3).unwrap().kind.as_deref(), Some("Workflow"));
        assert_eq!(doc.info(6).unwrap().template.as_deref(), Some("main"));
        assert_eq!(doc.info(12).unwrap().template.as_deref(), Some("main"));
        assert_eq!(doc.info(14).unwrap().template.as_deref(), Some("helper"));
    }

    #[test]
    fn test_segments_reset_state() {
        let text = "kind: Workflow\n---\nkind: ConfigMap\ndata:\n  k: v\n";
        let doc = ScanDocument::new(text);
        assert_eq!(doc.info(0).unwrap().segment, 0);
        assert_eq!(doc.info(0).unwrap().kind.as_deref(), Some("Workflow"));
        assert_eq!(doc.info(2).unwrap().segment, 1);
        assert_eq!(doc.info(2).unwrap().kind.as_deref(), Some("ConfigMap"));
        assert_eq!(doc.info(4).unwrap().kind.as_deref(), Some("ConfigMap"));
    }

    #[test]
    fn test_token_at() {
        let doc = ScanDocument::new("value: \"{{inputs.parameters.msg}}\"\n");
        let token = doc.token_at(pos(0, 15)).unwrap();
        assert_eq!(token.text, "inputs.parameters.msg");
        // Cursor just past the token end still finds it
        let token = doc.token_at(pos(0, 31)).unwrap();
        assert_eq!(token.text, "inputs.parameters.msg");
    }

    #[test]
    fn test_token_at_comment_never_matches() {
        let doc = ScanDocument::new("# name: app-config\n");
        assert!(doc.token_at(pos(0, 8)).is_none());
    }

    #[test]
    fn test_enclosing_block_key() {
        let text = "\
env:
  - name: LOG_LEVEL
    valueFrom:
      configMapKeyRef:
        name: app-config
        key: log-level
";
        let doc = ScanDocument::new(text);
        let (idx, key) = doc.enclosing_block_key(4).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(key, "configMapKeyRef");
        let (_, key) = doc.enclosing_block_key(3).unwrap();
        assert_eq!(key, "valueFrom");
    }

    #[test]
    fn test_block_chain() {
        let doc = ScanDocument::new(WORKFLOW);
        // `- name: msg` (line 9) -> parameters -> inputs -> `- name: main`
        let chain = doc.block_chain(9, 3);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].1, "parameters");
        assert_eq!(chain[1].1, "inputs");
        assert_eq!(chain[2].1, "name");
    }

    #[test]
    fn test_find_in_block_last_occurrence_wins() {
        let text = "\
configMapKeyRef:
  name: first
  name: second
  key: k
";
        let doc = ScanDocument::new(text);
        let (idx, value) = doc.find_in_block(0, "name").unwrap();
        assert_eq!(idx, 2);
        assert_eq!(value, "second");
    }

    #[test]
    fn test_find_in_block_stops_at_dedent() {
        let text = "\
configMapKeyRef:
  name: inside
other:
  name: outside
";
        let doc = ScanDocument::new(text);
        let (_, value) = doc.find_in_block(0, "name").unwrap();
        assert_eq!(value, "inside");
    }

    #[test]
    fn test_nearby_key_value_last_wins() {
        let text = "withItems: [a, b]\nx: 1\nwithItems: [c]\ny: 2\n";
        let doc = ScanDocument::new(text);
        let (idx, _) = doc.nearby_key_value(1, "withItems", 5).unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn test_literal_block() {
        let text = "\
script: |
  line one
  line two

  line three
next: key
";
        let doc = ScanDocument::new(text);
        let block = doc.literal_block(0);
        assert_eq!(block, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_literal_block_trailing_blank_dropped() {
        let text = "data: |\n  a\n\nnext: 1\n";
        let doc = ScanDocument::new(text);
        assert_eq!(doc.literal_block(0), vec![1]);
    }

    #[test]
    fn test_leading_comment() {
        let text = "# the main template\n# runs first\n- name: main\n";
        let doc = ScanDocument::new(text);
        assert_eq!(
            doc.leading_comment(2).as_deref(),
            Some("the main template\nruns first")
        );
        assert_eq!(doc.leading_comment(0), None);
    }

    #[test]
    fn test_parse_key_value() {
        let kv = parse_key_value("  - name: main").unwrap();
        assert_eq!(kv.key, "name");
        assert_eq!(kv.value, "main");
        assert!(kv.list_item);

        let kv = parse_key_value("templates:").unwrap();
        assert_eq!(kv.key, "templates");
        assert_eq!(kv.value, "");

        assert!(parse_key_value("- just a scalar").is_none());
    }

    #[test]
    fn test_trim_quotes() {
        assert_eq!(trim_quotes("\"x\""), "x");
        assert_eq!(trim_quotes("'x'"), "x");
        assert_eq!(trim_quotes("x"), "x");
        assert_eq!(trim_quotes("\"x"), "\"x");
    }

    #[test]
    fn test_word_starts() {
        assert_eq!(word_starts("name: {{ .Values.x }}"), vec![0, 10]);
    }
}
