//! Chart-template reference handling
//!
//! Detectors for the chart dialect: `.Values` paths, named templates,
//! builtin objects (`.Chart`/`.Release`/`.Capabilities`), control keywords
//! and builtin functions. Everything here requires the token to sit inside
//! a double-brace expression — the chart dialect has no bare-YAML
//! constructs of its own.

use std::sync::Arc;

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, Location, Position};

use crate::catalog;
use crate::document::utf16_col_to_byte;
use crate::index::{self, DefinitionLookup, Indices, DEFAULT_CHART_SCOPE};
use crate::refs::{
    BuiltinRoot, DetectedReference, ReferenceDetails, ResolvedReference,
};
use crate::scan;

use super::{DocumentContext, Handler};

/// Find the line defining `{{- define "name" }}` in the open document.
fn find_define_line(doc: &DocumentContext, name: &str) -> Option<usize> {
    for idx in 0..doc.scan.line_count() {
        let line = doc.scan.line(idx)?;
        for span in scan::expressions_in_line(line) {
            if matches!(span.head(), Some("define") | Some("block"))
                && index::quoted_argument(&span.inner).as_deref() == Some(name)
            {
                return Some(idx);
            }
        }
    }
    None
}

fn line_location(doc: &DocumentContext, line_idx: usize) -> Location {
    let len = doc
        .scan
        .line(line_idx)
        .map(crate::document::utf16_len)
        .unwrap_or(0);
    Location {
        uri: doc.uri.clone(),
        range: tower_lsp::lsp_types::Range {
            start: Position {
                line: line_idx as u32,
                character: 0,
            },
            end: Position {
                line: line_idx as u32,
                character: len,
            },
        },
    }
}

/// Handles named-template uses (`include`/`template`) and definitions
/// (`define`/`block`).
pub struct NamedTemplateHandler {
    indices: Arc<Indices>,
}

impl NamedTemplateHandler {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }
}

impl Handler for NamedTemplateHandler {
    fn name(&self) -> &'static str {
        "named-template"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        let span = scan::expression_at(line, token.start)?;

        let definition_site = match span.head() {
            Some("include") | Some("template") => false,
            Some("define") | Some("block") => true,
            _ => return None,
        };

        // The cursor must sit inside the quoted template-name argument
        let quote_start = span.text.find('"')?;
        let rest = &span.text[quote_start + 1..];
        let quote_len = rest.find('"')?;
        let arg_start = span.start + quote_start + 1;
        let arg_end = arg_start + quote_len;
        if token.start < arg_start || token.end > arg_end {
            return None;
        }

        let name = line[arg_start..arg_end].to_string();
        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::NamedTemplate {
                name,
                definition_site,
            },
        ))
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let (name, definition_site) = match &reference.details {
            ReferenceDetails::NamedTemplate {
                name,
                definition_site,
            } => (name, *definition_site),
            _ => return ResolvedReference::empty(),
        };

        if definition_site {
            return ResolvedReference {
                hover_markdown: Some(format!("**Named template** `{}`", name)),
                exists: Some(true),
                ..Default::default()
            };
        }

        match find_define_line(doc, name) {
            Some(def_idx) => ResolvedReference {
                hover_markdown: Some(format!("**Named template** `{}`", name)),
                definition_location: Some(line_location(doc, def_idx)),
                exists: Some(true),
                completions: None,
            },
            None => match self.indices.named_templates.lookup(DEFAULT_CHART_SCOPE, name) {
                Some(definition) => ResolvedReference {
                    hover_markdown: Some(format!("**Named template** `{}`", name)),
                    definition_location: Some(Location {
                        uri: definition.uri,
                        range: definition.range,
                    }),
                    exists: Some(true),
                    completions: None,
                },
                // Only a populated index can report a dangling name
                None if self
                    .indices
                    .named_templates
                    .list_all(DEFAULT_CHART_SCOPE)
                    .is_empty() =>
                {
                    ResolvedReference {
                        hover_markdown: Some(format!("**Named template** `{}`", name)),
                        ..Default::default()
                    }
                }
                None => ResolvedReference {
                    exists: Some(false),
                    ..Default::default()
                },
            },
        }
    }

    fn complete(&self, doc: &DocumentContext, position: Position) -> Vec<CompletionItem> {
        let line = match doc.scan.line(position.line as usize) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let byte = match utf16_col_to_byte(line, position.character) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let prefix = &line[..byte];
        // The cursor sits inside the still-open name argument when the
        // last quote in the prefix is the one opening an include/template
        // call
        fn call_arg_open(prefix: &str, call: &str) -> bool {
            match prefix.rfind(call) {
                Some(i) => prefix.rfind('"') == Some(i + call.len() - 1),
                None => false,
            }
        }
        if !call_arg_open(prefix, "include \"") && !call_arg_open(prefix, "template \"") {
            return Vec::new();
        }

        self.indices
            .named_templates
            .list_all(DEFAULT_CHART_SCOPE)
            .into_iter()
            .map(|d| CompletionItem {
                label: d.name,
                kind: Some(CompletionItemKind::FUNCTION),
                detail: Some("named template".to_string()),
                ..Default::default()
            })
            .collect()
    }
}

/// Handles `.Values.*` path references.
pub struct ValuesHandler {
    indices: Arc<Indices>,
}

impl ValuesHandler {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }
}

impl Handler for ValuesHandler {
    fn name(&self) -> &'static str {
        "values-path"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        scan::expression_at(line, token.start)?;

        let path_text = token.text.strip_prefix(".Values")?;
        let path: Vec<String> = path_text
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::ValuesPath { path },
        ))
    }

    fn resolve(&self, _doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let path = match &reference.details {
            ReferenceDetails::ValuesPath { path } => path,
            _ => return ResolvedReference::empty(),
        };
        if path.is_empty() {
            return ResolvedReference {
                hover_markdown: Some("**Values**\n\nThe chart's values object.".to_string()),
                exists: Some(true),
                ..Default::default()
            };
        }

        // An unpopulated values index cannot distinguish "missing" from
        // "not loaded"; only a populated one reports dangling paths
        if self.indices.values.list_all(DEFAULT_CHART_SCOPE).is_empty() {
            return ResolvedReference::empty();
        }

        let dotted = path.join(".");
        match self.indices.values.lookup(DEFAULT_CHART_SCOPE, &dotted) {
            Some(definition) => ResolvedReference {
                hover_markdown: Some(format!(
                    "**Values** `.Values.{}`{}",
                    dotted,
                    definition
                        .detail
                        .as_deref()
                        .map(|d| format!("\n\ncurrent: `{}`", d))
                        .unwrap_or_default()
                )),
                definition_location: Some(Location {
                    uri: definition.uri,
                    range: definition.range,
                }),
                exists: Some(true),
                completions: None,
            },
            None => ResolvedReference {
                exists: Some(false),
                ..Default::default()
            },
        }
    }

    fn complete(&self, doc: &DocumentContext, position: Position) -> Vec<CompletionItem> {
        let line = match doc.scan.line(position.line as usize) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let byte = match utf16_col_to_byte(line, position.character) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let prefix = &line[..byte];
        let values_pos = match prefix.rfind(".Values.") {
            Some(p) => p + ".Values.".len(),
            None => return Vec::new(),
        };
        let typed = &prefix[values_pos..];
        if typed.contains(|c: char| c.is_whitespace()) {
            return Vec::new();
        }
        // Complete the next path segment under what is already typed
        let parent = match typed.rfind('.') {
            Some(d) => &typed[..d],
            None => "",
        };

        let mut seen = std::collections::HashSet::new();
        let mut items = Vec::new();
        for definition in self.indices.values.list_all(DEFAULT_CHART_SCOPE) {
            let remainder = match parent {
                "" => definition.name.as_str(),
                p => match definition
                    .name
                    .strip_prefix(p)
                    .and_then(|r| r.strip_prefix('.'))
                {
                    Some(r) => r,
                    None => continue,
                },
            };
            let segment = remainder.split('.').next().unwrap_or_default();
            if segment.is_empty() || !seen.insert(segment.to_string()) {
                continue;
            }
            items.push(CompletionItem {
                label: segment.to_string(),
                kind: Some(CompletionItemKind::FIELD),
                detail: (remainder == segment).then(|| definition.detail.clone()).flatten(),
                ..Default::default()
            });
        }
        items
    }
}

/// Handles `.Chart`, `.Release` and `.Capabilities` variables.
pub struct BuiltinVariableHandler;

impl BuiltinVariableHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BuiltinVariableHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for BuiltinVariableHandler {
    fn name(&self) -> &'static str {
        "builtin-variable"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        scan::expression_at(line, token.start)?;

        let (root, rest) = if let Some(rest) = token.text.strip_prefix(".Chart") {
            (BuiltinRoot::Chart, rest)
        } else if let Some(rest) = token.text.strip_prefix(".Release") {
            (BuiltinRoot::Release, rest)
        } else if let Some(rest) = token.text.strip_prefix(".Capabilities") {
            (BuiltinRoot::Capabilities, rest)
        } else {
            return None;
        };
        let field = rest
            .strip_prefix('.')
            .and_then(|r| r.split('.').next())
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string());
        if field.is_none() && !rest.is_empty() {
            return None;
        }

        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::BuiltinVariable { root, field },
        ))
    }

    fn resolve(&self, _doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let (root, field) = match &reference.details {
            ReferenceDetails::BuiltinVariable { root, field } => (*root, field),
            _ => return ResolvedReference::empty(),
        };
        let (label, fields, summary) = match root {
            BuiltinRoot::Chart => (
                "Chart",
                catalog::CHART_FIELDS,
                "Chart metadata from Chart.yaml.",
            ),
            BuiltinRoot::Release => (
                "Release",
                catalog::RELEASE_FIELDS,
                "Information about the release being rendered.",
            ),
            BuiltinRoot::Capabilities => (
                "Capabilities",
                catalog::CAPABILITIES_FIELDS,
                "Capabilities of the target cluster.",
            ),
        };

        match field {
            None => ResolvedReference {
                hover_markdown: Some(format!("**.{}**\n\n{}", label, summary)),
                exists: Some(true),
                ..Default::default()
            },
            Some(f) => match catalog::builtin_field_doc(fields, f) {
                Some(doc) => ResolvedReference {
                    hover_markdown: Some(format!("**.{}.{}**\n\n{}", label, f, doc)),
                    exists: Some(true),
                    ..Default::default()
                },
                None => ResolvedReference {
                    exists: Some(false),
                    ..Default::default()
                },
            },
        }
    }
}

/// Handles Go-template control keywords at expression heads.
pub struct KeywordHandler;

impl KeywordHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KeywordHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for KeywordHandler {
    fn name(&self) -> &'static str {
        "go-template-keyword"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        let span = scan::expression_at(line, token.start)?;

        if !catalog::is_keyword(&token.text) {
            return None;
        }
        // Only the control position counts: the first word of the
        // expression, or the word right after a leading `else`
        let mut words = span.inner.split_whitespace();
        let first = words.next();
        let second = words.next();
        let is_control_position = first == Some(token.text.as_str())
            || (first == Some("else") && second == Some(token.text.as_str()));
        if !is_control_position {
            return None;
        }

        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::Keyword {
                word: token.text.clone(),
            },
        ))
    }

    fn resolve(&self, _doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let word = match &reference.details {
            ReferenceDetails::Keyword { word } => word,
            _ => return ResolvedReference::empty(),
        };
        match catalog::keyword_doc(word) {
            Some(doc) => ResolvedReference {
                hover_markdown: Some(format!("**{}**\n\n{}", word, doc)),
                ..Default::default()
            },
            None => ResolvedReference::empty(),
        }
    }
}

/// Handles builtin function names inside expressions.
pub struct BuiltinFunctionHandler;

impl BuiltinFunctionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BuiltinFunctionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for BuiltinFunctionHandler {
    fn name(&self) -> &'static str {
        "builtin-function"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        scan::expression_at(line, token.start)?;

        // Bare identifiers only: paths and fields are other handlers' business
        if token.text.contains('.') {
            return None;
        }
        catalog::builtin_function(&token.text)?;

        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::BuiltinFunction {
                name: token.text.clone(),
            },
        ))
    }

    fn resolve(&self, _doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let name = match &reference.details {
            ReferenceDetails::BuiltinFunction { name } => name,
            _ => return ResolvedReference::empty(),
        };
        match catalog::builtin_function(name) {
            Some(function) => ResolvedReference {
                hover_markdown: Some(format!(
                    "```\n{}\n```\n\n{}",
                    function.signature, function.doc
                )),
                exists: Some(true),
                ..Default::default()
            },
            None => ResolvedReference::empty(),
        }
    }

    fn complete(&self, doc: &DocumentContext, position: Position) -> Vec<CompletionItem> {
        let line = match doc.scan.line(position.line as usize) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let byte = match utf16_col_to_byte(line, position.character) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let prefix = line[..byte].trim_end();
        // Functions complete at the start of an expression and after a pipe
        if !(prefix.ends_with("{{") || prefix.ends_with("{{-") || prefix.ends_with('|')) {
            return Vec::new();
        }

        catalog::BUILTIN_FUNCTIONS
            .iter()
            .map(|f| CompletionItem {
                label: f.name.to_string(),
                kind: Some(CompletionItemKind::FUNCTION),
                detail: Some(f.signature.to_string()),
                documentation: Some(tower_lsp::lsp_types::Documentation::String(
                    f.doc.to_string(),
                )),
                ..Default::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ReferenceKind;
    use tower_lsp::lsp_types::Url;

    const CHART: &str = "\
{{- define \"app.labels\" -}}
app: {{ .Chart.Name }}
release: {{ .Release.Name }}
{{- end }}
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ include \"app.labels\" . }}
spec:
  replicas: {{ .Values.replicas | default 1 }}
  image: {{ .Values.image.repository | quote }}
";

    fn doc() -> DocumentContext {
        DocumentContext::new(
            Url::parse("file:///chart/templates/deploy.yaml").unwrap(),
            CHART,
        )
    }

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn seeded_indices() -> Arc<Indices> {
        let indices = Indices::new();
        index::ingest_values(
            &indices,
            DEFAULT_CHART_SCOPE,
            &Url::parse("file:///chart/values.yaml").unwrap(),
            "replicas: 2\nimage:\n  repository: nginx\n",
        );
        indices
    }

    #[test]
    fn test_detect_named_template_use() {
        let handler = NamedTemplateHandler::new(Indices::new());
        let document = doc();
        // Cursor inside "app.labels" in the include call on line 7
        let detected = handler.detect(&document, pos(7, 22)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::HelmTemplateName);
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::NamedTemplate { name, definition_site: false } if name == "app.labels"
        );

        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert_eq!(resolved.definition_location.unwrap().range.start.line, 0);
    }

    #[test]
    fn test_detect_named_template_definition() {
        let handler = NamedTemplateHandler::new(Indices::new());
        let document = doc();
        let detected = handler.detect(&document, pos(0, 14)).unwrap();
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::NamedTemplate { definition_site: true, .. }
        );
    }

    #[test]
    fn test_named_template_missing() {
        // A populated index reports the dangling name
        let indices = Indices::new();
        let helpers = "{{- define \"chart.labels\" -}}\napp: x\n{{- end }}\n";
        index::ingest_document(
            &indices,
            &Url::parse("file:///t/templates/_helpers.tpl").unwrap(),
            &crate::scan::ScanDocument::new(helpers),
        );

        let handler = NamedTemplateHandler::new(indices);
        let text = "name: {{ include \"chart.missing\" . }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(0, 20)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
    }

    #[test]
    fn test_named_template_unverifiable_without_index() {
        let handler = NamedTemplateHandler::new(Indices::new());
        let text = "name: {{ include \"chart.missing\" . }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(0, 20)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, None);
    }

    #[test]
    fn test_detect_values_path() {
        let handler = ValuesHandler::new(seeded_indices());
        let document = doc();
        // `.Values.image.repository` on line 10
        let detected = handler.detect(&document, pos(10, 15)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::HelmValuesPath);
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::ValuesPath { path } if path == &["image", "repository"]
        );

        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert!(resolved.hover_markdown.unwrap().contains("nginx"));
    }

    #[test]
    fn test_values_path_missing() {
        let handler = ValuesHandler::new(seeded_indices());
        let text = "x: {{ .Values.bogus.path }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(0, 10)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
    }

    #[test]
    fn test_values_outside_expression_ignored() {
        let handler = ValuesHandler::new(Indices::new());
        let text = "comment-free: .Values.replicas\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        assert!(handler.detect(&document, pos(0, 20)).is_none());
    }

    #[test]
    fn test_detect_builtin_variable() {
        let handler = BuiltinVariableHandler::new();
        let document = doc();
        // `.Chart.Name` on line 1
        let detected = handler.detect(&document, pos(1, 10)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::HelmChartVariable);
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert!(resolved.hover_markdown.unwrap().contains(".Chart.Name"));
    }

    #[test]
    fn test_builtin_variable_unknown_field() {
        let handler = BuiltinVariableHandler::new();
        let text = "x: {{ .Release.Bogus }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(0, 10)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::HelmReleaseVariable);
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
    }

    #[test]
    fn test_detect_keyword_only_in_control_position() {
        let handler = KeywordHandler::new();
        let text = "{{- if .Values.enabled }}\nx: {{ .Values.if }}\n{{- end }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(0, 5)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::GoTemplateKeyword);
        assert!(handler
            .resolve(&document, &detected)
            .hover_markdown
            .unwrap()
            .contains("conditional"));

        let end = handler.detect(&document, pos(2, 5)).unwrap();
        assert_matches::assert_matches!(
            &end.details,
            ReferenceDetails::Keyword { word } if word == "end"
        );
    }

    #[test]
    fn test_detect_builtin_function() {
        let handler = BuiltinFunctionHandler::new();
        let document = doc();
        // `default` after the pipe on line 9
        let detected = handler.detect(&document, pos(9, 35)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::HelmBuiltinFunction);
        let resolved = handler.resolve(&document, &detected);
        assert!(resolved
            .hover_markdown
            .unwrap()
            .contains("default DEFAULT VALUE"));
    }

    #[test]
    fn test_function_completion_after_pipe() {
        let handler = BuiltinFunctionHandler::new();
        let text = "x: {{ .Values.a | }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let items = handler.complete(&document, pos(0, 18));
        assert!(items.iter().any(|i| i.label == "default"));
        assert!(handler.complete(&document, pos(0, 3)).is_empty());
    }

    #[test]
    fn test_values_completion_segments() {
        let handler = ValuesHandler::new(seeded_indices());
        let text = "x: {{ .Values. }}\n";
        let document =
            DocumentContext::new(Url::parse("file:///t/templates/x.yaml").unwrap(), text);
        let items = handler.complete(&document, pos(0, 14));
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"replicas"));
        assert!(labels.contains(&"image"));
        assert!(!labels.contains(&"repository"));
    }
}
