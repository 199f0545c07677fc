//! Guarded handler registry
//!
//! Composes every reference detector/resolver into one deterministic
//! position-to-result pipeline. Guards gate groups of handlers behind a
//! cheap document-level applicability test; within a guard, handlers run in
//! list order and the first detection wins. Both orders are explicit,
//! constructed state — the lists built in [`Registry::new`] are the
//! system's declared conflict-resolution priority, never incidental
//! iteration order.
//!
//! Handlers must positively discriminate: the two dialects are not lexically
//! disjoint, so `detect` requires corroborating context (sibling keys,
//! section markers, enclosing blocks) before claiming a token. An
//! under-discriminating handler placed early would silently steal matches
//! intended for a later one.

mod helm;
mod kube;
mod workflow;

use std::collections::HashSet;
use std::sync::Arc;

use tower_lsp::lsp_types::{CompletionItem, Location, Position, Url};

use crate::document::byte_to_utf16_col;
use crate::index::Indices;
use crate::refs::{DetectedReference, ResolvedReference};
use crate::scan::{self, ScanDocument};

pub use helm::{BuiltinFunctionHandler, BuiltinVariableHandler, KeywordHandler, NamedTemplateHandler, ValuesHandler};
pub use kube::KubeRefHandler;
pub use workflow::{ItemHandler, ParameterHandler, StepOutputHandler, TemplateHandler, WorkflowVariableHandler};

/// Which dialect a document belongs to, decided by cheap text sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// A workflow-orchestration manifest (`kind: Workflow` and friends)
    Workflow,
    /// A chart template with double-brace expressions
    HelmTemplate,
    /// Output of the external renderer (`# Source:` markers)
    RenderedOutput,
    /// Anything else
    PlainYaml,
}

const WORKFLOW_KINDS: &[&str] = &[
    "Workflow",
    "WorkflowTemplate",
    "CronWorkflow",
    "ClusterWorkflowTemplate",
];

impl Dialect {
    /// Sniff the dialect from the scanned document and its URI.
    pub fn sniff(scan: &ScanDocument, uri: &Url) -> Self {
        // Renderer output is decisive: rendered manifests carry `kind:` lines
        // of their own, so this check runs first.
        for idx in 0..scan.line_count().min(5) {
            if let Some(line) = scan.line(idx) {
                if line.trim_start().starts_with("# Source:") {
                    return Self::RenderedOutput;
                }
            }
        }

        for idx in 0..scan.line_count() {
            if let Some(info) = scan.info(idx) {
                if let Some(kind) = info.kind.as_deref() {
                    if WORKFLOW_KINDS.contains(&kind) {
                        return Self::Workflow;
                    }
                }
            }
        }

        let in_templates_dir = uri.path().contains("/templates/");
        for idx in 0..scan.line_count() {
            let line = match scan.line(idx) {
                Some(l) => l,
                None => continue,
            };
            for span in scan::expressions_in_line(line) {
                if in_templates_dir
                    || span.inner.contains(".Values")
                    || span.inner.contains(".Release")
                    || span.inner.contains(".Chart")
                    || matches!(span.head(), Some("include") | Some("define"))
                {
                    return Self::HelmTemplate;
                }
            }
        }

        Self::PlainYaml
    }
}

/// A document snapshot prepared for detection
#[derive(Debug)]
pub struct DocumentContext {
    pub uri: Url,
    pub scan: ScanDocument,
    pub dialect: Dialect,
}

impl DocumentContext {
    pub fn new(uri: Url, text: &str) -> Self {
        let scan = ScanDocument::new(text);
        let dialect = Dialect::sniff(&scan, &uri);
        Self { uri, scan, dialect }
    }
}

/// Pluggable detector + resolver for one reference kind
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide whether the position sits on this handler's construct and
    /// extract the identifying payload. Returns `None` for anything
    /// unparsable, out of scope, or ambiguous — never panics.
    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference>;

    /// Resolve a detected reference. Must refuse payloads not matching this
    /// handler's kind, and must return the empty resolution (never an error)
    /// for an unresolvable identity.
    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference;

    /// Optional completion contributions at a position.
    fn complete(&self, _doc: &DocumentContext, _position: Position) -> Vec<CompletionItem> {
        Vec::new()
    }
}

/// A group of handlers gated by a document-level applicability test
pub struct Guard {
    pub name: &'static str,
    applies_to: fn(&DocumentContext) -> bool,
    handlers: Vec<Box<dyn Handler>>,
}

impl Guard {
    pub fn new(
        name: &'static str,
        applies_to: fn(&DocumentContext) -> bool,
        handlers: Vec<Box<dyn Handler>>,
    ) -> Self {
        Self {
            name,
            applies_to,
            handlers,
        }
    }

    pub fn applies_to(&self, doc: &DocumentContext) -> bool {
        (self.applies_to)(doc)
    }

    pub fn handlers(&self) -> &[Box<dyn Handler>] {
        &self.handlers
    }
}

fn applies_workflow(doc: &DocumentContext) -> bool {
    doc.dialect == Dialect::Workflow
}

fn applies_kube(doc: &DocumentContext) -> bool {
    matches!(doc.dialect, Dialect::Workflow | Dialect::PlainYaml)
}

fn applies_helm(doc: &DocumentContext) -> bool {
    doc.dialect == Dialect::HelmTemplate
}

/// The guarded, priority-ordered reference-resolution registry
pub struct Registry {
    guards: Vec<Guard>,
}

impl Registry {
    /// Build the registry with its declared guard/handler priority order.
    ///
    /// ConfigMap/Secret handlers come first so a `name:` nested under
    /// `configMapKeyRef:` is never claimed by a generic name handler.
    pub fn new(indices: Arc<Indices>) -> Self {
        let guards = vec![
            Guard::new(
                "kube-env",
                applies_kube,
                vec![
                    Box::new(KubeRefHandler::config_maps(indices.clone())) as Box<dyn Handler>,
                    Box::new(KubeRefHandler::secrets(indices.clone())),
                ],
            ),
            Guard::new(
                "workflow",
                applies_workflow,
                vec![
                    Box::new(StepOutputHandler::new()) as Box<dyn Handler>,
                    Box::new(ParameterHandler::new(indices.clone())),
                    Box::new(ItemHandler::new()),
                    Box::new(WorkflowVariableHandler::new(indices.clone())),
                    Box::new(TemplateHandler::new(indices.clone())),
                ],
            ),
            Guard::new(
                "helm-template",
                applies_helm,
                vec![
                    Box::new(NamedTemplateHandler::new(indices.clone())) as Box<dyn Handler>,
                    Box::new(ValuesHandler::new(indices.clone())),
                    Box::new(BuiltinVariableHandler::new()),
                    Box::new(KeywordHandler::new()),
                    Box::new(BuiltinFunctionHandler::new()),
                ],
            ),
        ];
        Self { guards }
    }

    /// Build a registry from an explicit guard list (tests exercise ordering
    /// through this).
    pub fn with_guards(guards: Vec<Guard>) -> Self {
        Self { guards }
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Detect the construct under the cursor, if any handler claims it.
    pub fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        self.detect_with_handler(doc, position).map(|(r, _)| r)
    }

    fn detect_with_handler(
        &self,
        doc: &DocumentContext,
        position: Position,
    ) -> Option<(DetectedReference, &dyn Handler)> {
        for guard in &self.guards {
            if !guard.applies_to(doc) {
                continue;
            }
            for handler in &guard.handlers {
                if let Some(reference) = handler.detect(doc, position) {
                    tracing::debug!(
                        "detected {:?} via {}/{}",
                        reference.kind,
                        guard.name,
                        handler.name()
                    );
                    return Some((reference, handler.as_ref()));
                }
            }
        }
        None
    }

    /// Resolve the construct under the cursor. The first handler whose
    /// `detect` matches wins; an empty resolution means no match anywhere.
    pub fn detect_and_resolve(&self, doc: &DocumentContext, position: Position) -> ResolvedReference {
        match self.detect_with_handler(doc, position) {
            Some((reference, handler)) => handler.resolve(doc, &reference),
            None => ResolvedReference::empty(),
        }
    }

    /// Collect completions from every applicable handler. Unlike
    /// `detect_and_resolve` this does not stop at the first contribution:
    /// several handlers may legitimately complete at the same trigger.
    pub fn provide_completions(&self, doc: &DocumentContext, position: Position) -> Vec<CompletionItem> {
        let mut items = Vec::new();
        for guard in &self.guards {
            if !guard.applies_to(doc) {
                continue;
            }
            for handler in &guard.handlers {
                items.extend(handler.complete(doc, position));
            }
        }
        items
    }

    /// Find every reference across the corpus naming the same logical entity
    /// as the construct under the cursor. Symmetric: starting from a
    /// definition site or any use-site yields the same set.
    pub fn find_all_references(
        &self,
        doc: &DocumentContext,
        position: Position,
        corpus: &[&DocumentContext],
    ) -> Vec<Location> {
        let origin = match self.detect(doc, position) {
            Some(r) => r,
            None => return Vec::new(),
        };
        let identity = match origin.identity() {
            Some(id) => id,
            None => return Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut locations = Vec::new();
        for candidate_doc in corpus {
            for position in candidate_positions(&candidate_doc.scan) {
                let detected = match self.detect(candidate_doc, position) {
                    Some(d) => d,
                    None => continue,
                };
                if detected.identity().as_ref() != Some(&identity) {
                    continue;
                }
                let range = detected.source_range;
                let key = (
                    candidate_doc.uri.to_string(),
                    range.start.line,
                    range.start.character,
                    range.end.line,
                    range.end.character,
                );
                if seen.insert(key) {
                    locations.push(Location {
                        uri: candidate_doc.uri.clone(),
                        range,
                    });
                }
            }
        }
        locations
    }
}

/// Candidate cursor positions for a corpus re-scan: the start of every word
/// token on every non-comment line.
fn candidate_positions(scan: &ScanDocument) -> Vec<Position> {
    let mut positions = Vec::new();
    for idx in 0..scan.line_count() {
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        if scan::is_comment(line) || scan::is_blank(line) {
            continue;
        }
        for start in scan::word_starts(line) {
            positions.push(Position {
                line: idx as u32,
                character: byte_to_utf16_col(line, start),
            });
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("file:///{}", path)).unwrap()
    }

    #[test]
    fn test_dialect_sniff_workflow() {
        let doc = DocumentContext::new(
            url("wf.yaml"),
            "apiVersion: argoproj.io/v1alpha1\nkind: Workflow\nspec:\n  templates: []\n",
        );
        assert_eq!(doc.dialect, Dialect::Workflow);
    }

    #[test]
    fn test_dialect_sniff_helm() {
        let doc = DocumentContext::new(
            url("chart/templates/deploy.yaml"),
            "metadata:\n  name: {{ .Values.name }}\n",
        );
        assert_eq!(doc.dialect, Dialect::HelmTemplate);
    }

    #[test]
    fn test_dialect_sniff_rendered() {
        let doc = DocumentContext::new(
            url("out.yaml"),
            "---\n# Source: chart/templates/deploy.yaml\nkind: Deployment\n",
        );
        assert_eq!(doc.dialect, Dialect::RenderedOutput);
    }

    #[test]
    fn test_dialect_sniff_plain() {
        let doc = DocumentContext::new(url("cm.yaml"), "kind: ConfigMap\ndata:\n  k: v\n");
        assert_eq!(doc.dialect, Dialect::PlainYaml);
    }

    #[test]
    fn test_registry_empty_on_no_match() {
        let registry = Registry::new(Indices::new());
        let doc = DocumentContext::new(url("x.yaml"), "plain: scalar\n");
        let resolved = registry.detect_and_resolve(
            &doc,
            Position {
                line: 0,
                character: 2,
            },
        );
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_guard_skipped_when_not_applicable() {
        // A helm-looking token inside a workflow manifest must not reach the
        // helm guard: its applies_to fails for the Workflow dialect.
        let registry = Registry::new(Indices::new());
        let doc = DocumentContext::new(
            url("wf.yaml"),
            "kind: Workflow\nspec:\n  x: \"{{ .Values.name }}\"\n",
        );
        assert_eq!(doc.dialect, Dialect::Workflow);
        let detected = registry.detect(
            &doc,
            Position {
                line: 2,
                character: 11,
            },
        );
        assert!(detected.is_none());
    }
}
