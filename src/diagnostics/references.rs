//! Dangling-reference diagnostics
//!
//! Re-runs detection over a document's candidate positions and reports
//! every reference whose resolution came back with `exists == false`. A
//! reference the indices cannot verify (`exists == None`) stays silent —
//! only positively-missing targets are worth a squiggle.

use std::collections::HashSet;

use crate::registry::{DocumentContext, Registry};
use crate::scan;

use super::DiagnosticCollector;

pub fn collect_reference_diagnostics(
    registry: &Registry,
    doc: &DocumentContext,
    collector: &mut DiagnosticCollector,
) {
    let mut seen_ranges = HashSet::new();

    for line_idx in 0..doc.scan.line_count() {
        let line = match doc.scan.line(line_idx) {
            Some(l) => l,
            None => continue,
        };
        if scan::is_comment(line) || scan::is_blank(line) {
            continue;
        }
        for start in scan::word_starts(line) {
            let position = tower_lsp::lsp_types::Position {
                line: line_idx as u32,
                character: crate::document::byte_to_utf16_col(line, start),
            };
            let reference = match registry.detect(doc, position) {
                Some(r) => r,
                None => continue,
            };
            let range = reference.source_range;
            let key = (
                range.start.line,
                range.start.character,
                range.end.line,
                range.end.character,
            );
            if !seen_ranges.insert(key) {
                continue;
            }

            let resolved = registry.detect_and_resolve(doc, position);
            if resolved.exists == Some(false) {
                collector.add_unresolved_reference(
                    reference.kind.label(),
                    &reference.details.display_name(),
                    range,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Indices;
    use tower_lsp::lsp_types::Url;

    fn diagnostics_for(text: &str) -> Vec<tower_lsp::lsp_types::Diagnostic> {
        let registry = Registry::new(Indices::new());
        let doc = DocumentContext::new(Url::parse("file:///wf.yaml").unwrap(), text);
        let mut collector = DiagnosticCollector::new();
        collect_reference_diagnostics(&registry, &doc, &mut collector);
        collector.into_diagnostics()
    }

    #[test]
    fn test_dangling_template_reported() {
        let text = "\
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: a
            template: missing
";
        let diagnostics = diagnostics_for(text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "template 'missing' not found");
        assert_eq!(diagnostics[0].range.start.line, 6);
    }

    #[test]
    fn test_resolved_references_stay_silent() {
        let text = "\
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: a
            template: helper
    - name: helper
      container:
        image: alpine
";
        assert!(diagnostics_for(text).is_empty());
    }

    #[test]
    fn test_missing_parameter_reported() {
        let text = "\
kind: Workflow
spec:
  templates:
    - name: main
      container:
        args: [\"{{inputs.parameters.ghost}}\"]
";
        let diagnostics = diagnostics_for(text);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("'ghost' not found"));
    }
}
