//! Double-brace template expression scanning
//!
//! Finds `{{ ... }}` expression spans on a single line using byte-wise
//! matching that skips string literals, so braces inside quoted arguments
//! (`{{ include "{x}" . }}`) do not terminate the span early. Trim markers
//! (`{{-` / `-}}`) are part of the span but not of the inner text.

/// A single template expression found on a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionSpan {
    /// Start byte offset within the line (at the first `{`)
    pub start: usize,
    /// End byte offset within the line (exclusive, past the final `}`)
    pub end: usize,
    /// The full expression text, braces included
    pub text: String,
    /// The inner text with braces and trim markers removed, trimmed
    pub inner: String,
}

impl ExpressionSpan {
    /// First whitespace-delimited word of the inner text, if any
    pub fn head(&self) -> Option<&str> {
        self.inner.split_whitespace().next()
    }
}

/// Scan a single line for `{{ ... }}` expression spans.
///
/// An unclosed `{{` consumes the rest of the line: multi-line expressions are
/// treated line-locally, which is all the line-oriented detectors need.
pub fn expressions_in_line(line: &str) -> Vec<ExpressionSpan> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut spans = Vec::new();
    let mut i = 0;

    while i + 1 < len {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            let end = find_closing_braces(line, i).unwrap_or(len);
            let text = line[i..end].to_string();
            spans.push(ExpressionSpan {
                start: i,
                end,
                inner: inner_text(&text),
                text,
            });
            i = end;
        } else {
            i += 1;
        }
    }

    spans
}

/// Find the end (exclusive) of the `}}` closing the `{{` at `open_pos`.
///
/// Skips the contents of single- and double-quoted strings, including
/// escaped quotes.
fn find_closing_braces(line: &str, open_pos: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut i = open_pos + 2;

    while i < len {
        match bytes[i] {
            b'}' if i + 1 < len && bytes[i + 1] == b'}' => return Some(i + 2),
            b'"' => {
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'"' => break,
                        _ => i += 1,
                    }
                }
            }
            b'\'' => {
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'\'' => break,
                        _ => i += 1,
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Strip braces and trim markers from a full expression text.
fn inner_text(text: &str) -> String {
    let mut inner = text;
    inner = inner.strip_prefix("{{").unwrap_or(inner);
    inner = inner.strip_suffix("}}").unwrap_or(inner);
    inner = inner.strip_prefix('-').unwrap_or(inner);
    inner = inner.strip_suffix('-').unwrap_or(inner);
    inner.trim().to_string()
}

/// Control-flow keywords that open, continue, or close a template block.
///
/// A line consisting solely of such expressions produces no rendered output
/// and is excluded from anchor candidacy during correlation.
const CONTROL_HEADS: &[&str] = &[
    "if", "else", "range", "with", "define", "block", "end", "template",
];

/// True if the line's content is nothing but template expressions.
pub fn is_expression_only_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let spans = expressions_in_line(trimmed);
    if spans.is_empty() {
        return false;
    }
    let mut cursor = 0usize;
    for span in &spans {
        if !trimmed[cursor..span.start].trim().is_empty() {
            return false;
        }
        cursor = span.end;
    }
    trimmed[cursor..].trim().is_empty()
}

/// True if the line's content is entirely control-flow template expressions.
pub fn is_control_line(line: &str) -> bool {
    let trimmed = line.trim();
    if !is_expression_only_line(trimmed) {
        return false;
    }
    expressions_in_line(trimmed)
        .iter()
        .all(|span| span.head().map(|h| CONTROL_HEADS.contains(&h)).unwrap_or(false))
}

/// Remove all expression spans from a line, leaving the literal text.
pub fn strip_expressions(line: &str) -> String {
    let spans = expressions_in_line(line);
    if spans.is_empty() {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0usize;
    for span in &spans {
        out.push_str(&line[cursor..span.start]);
        cursor = span.end;
    }
    out.push_str(&line[cursor..]);
    out
}

/// The expression span containing the given byte offset, if any.
pub fn expression_at(line: &str, byte_offset: usize) -> Option<ExpressionSpan> {
    expressions_in_line(line)
        .into_iter()
        .find(|s| byte_offset >= s.start && byte_offset < s.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_expression() {
        let spans = expressions_in_line("name: {{ .Values.name }}");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 6);
        assert_eq!(spans[0].text, "{{ .Values.name }}");
        assert_eq!(spans[0].inner, ".Values.name");
    }

    #[test]
    fn test_trim_markers() {
        let spans = expressions_in_line("{{- if .Values.enabled }}");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].inner, "if .Values.enabled");
        assert_eq!(spans[0].head(), Some("if"));
    }

    #[test]
    fn test_multiple_expressions() {
        let spans = expressions_in_line("{{ .Release.Name }}-{{ .Chart.Name }}");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].inner, ".Release.Name");
        assert_eq!(spans[1].inner, ".Chart.Name");
    }

    #[test]
    fn test_braces_inside_strings() {
        let spans = expressions_in_line(r#"x: {{ include "a}}b" . }}"#);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, r#"{{ include "a}}b" . }}"#);
    }

    #[test]
    fn test_unclosed_expression_runs_to_eol() {
        let spans = expressions_in_line("value: {{ .Values.x");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end, "value: {{ .Values.x".len());
    }

    #[test]
    fn test_workflow_expression() {
        let spans = expressions_in_line("value: \"{{inputs.parameters.msg}}\"");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].inner, "inputs.parameters.msg");
    }

    #[test]
    fn test_is_control_line() {
        assert!(is_control_line("{{- if .Values.enabled }}"));
        assert!(is_control_line("{{ end }}"));
        assert!(is_control_line("  {{- else }}  "));
        assert!(is_control_line(r#"{{- define "chart.labels" -}}"#));
        assert!(is_control_line("{{- range .Values.hosts }}"));
        assert!(!is_control_line("name: {{ .Values.name }}"));
        assert!(!is_control_line("{{ .Values.name }}"));
        assert!(!is_control_line("plain: line"));
        assert!(!is_control_line(""));
    }

    #[test]
    fn test_is_expression_only_line() {
        assert!(is_expression_only_line("{{ .Values.name }}"));
        assert!(is_expression_only_line("{{ include \"x\" . }}"));
        assert!(is_expression_only_line("{{- if .X }}"));
        assert!(!is_expression_only_line("name: {{ .Values.name }}"));
        assert!(!is_expression_only_line("plain"));
        assert!(!is_expression_only_line(""));
    }

    #[test]
    fn test_strip_expressions() {
        assert_eq!(strip_expressions("name: {{ .Values.n }}"), "name: ");
        assert_eq!(
            strip_expressions("{{ .Release.Name }}-{{ .Chart.Name }}"),
            "-"
        );
        assert_eq!(strip_expressions("plain"), "plain");
    }

    #[test]
    fn test_expression_at() {
        let line = "a: {{ .Values.x }} b: {{ .Values.y }}";
        assert_eq!(expression_at(line, 5).unwrap().inner, ".Values.x");
        assert_eq!(expression_at(line, 25).unwrap().inner, ".Values.y");
        assert!(expression_at(line, 0).is_none());
    }
}
