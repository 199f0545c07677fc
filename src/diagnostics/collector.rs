//! Diagnostic collection

use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range,
};

/// Stable diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    YamlSyntax,
    UnresolvedReference,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YamlSyntax => "yaml-syntax",
            Self::UnresolvedReference => "unresolved-reference",
        }
    }
}

const SOURCE: &str = "yaml-gotmpl-lsp";

/// Collects diagnostics during parsing and resolution
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    /// Create a new empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a YAML syntax error at a point position
    pub fn add_syntax_error(&mut self, message: String, line: u32, column: u32) {
        let position = Position {
            line,
            character: column,
        };
        self.diagnostics.push(Diagnostic {
            range: Range {
                start: position,
                end: position,
            },
            severity: Some(DiagnosticSeverity::ERROR),
            code: Some(NumberOrString::String(
                DiagnosticCode::YamlSyntax.as_str().to_string(),
            )),
            code_description: None,
            source: Some(SOURCE.to_string()),
            message,
            related_information: None,
            tags: None,
            data: None,
        });
    }

    /// Add a dangling-reference warning at the reference's range
    pub fn add_unresolved_reference(&mut self, kind_label: &str, name: &str, range: Range) {
        self.diagnostics.push(Diagnostic {
            range,
            severity: Some(DiagnosticSeverity::WARNING),
            code: Some(NumberOrString::String(
                DiagnosticCode::UnresolvedReference.as_str().to_string(),
            )),
            code_description: None,
            source: Some(SOURCE.to_string()),
            message: format!("{} '{}' not found", kind_label, name),
            related_information: None,
            tags: None,
            data: None,
        });
    }

    /// Convert into the final list of diagnostics
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_shape() {
        let mut collector = DiagnosticCollector::new();
        collector.add_syntax_error("mapping values are not allowed".to_string(), 2, 4);
        let diagnostics = collector.into_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostics[0].range.start.line, 2);
        assert_eq!(diagnostics[0].source.as_deref(), Some(SOURCE));
    }

    #[test]
    fn test_unresolved_reference_message() {
        let mut collector = DiagnosticCollector::new();
        collector.add_unresolved_reference("ConfigMap", "app-config", Range::default());
        let diagnostics = collector.into_diagnostics();
        assert_eq!(diagnostics[0].message, "ConfigMap 'app-config' not found");
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
    }
}
