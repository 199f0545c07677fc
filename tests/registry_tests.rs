//! Registry-level behavior: guard priority, determinism, reference
//! symmetry, and degradation when the renderer is down.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tower_lsp::lsp_types::{Position, Range, Url};
use yaml_gotmpl_lsp::index::{self, Indices};
use yaml_gotmpl_lsp::refs::{
    DetectedReference, ReferenceDetails, ReferenceKind, ResolvedReference,
};
use yaml_gotmpl_lsp::registry::{Dialect, DocumentContext, Guard, Handler, Registry};
use yaml_gotmpl_lsp::render::{
    CorrelationService, RenderFailure, RenderOutput, Renderer,
};
use yaml_gotmpl_lsp::scan::ScanDocument;

fn url(path: &str) -> Url {
    Url::parse(&format!("file:///{}", path)).unwrap()
}

fn pos(line: u32, character: u32) -> Position {
    Position { line, character }
}

const WORKFLOW: &str = "\
apiVersion: argoproj.io/v1alpha1
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: first
            template: helper
        - - name: second
            template: helper
      container:
        env:
          - name: LOG_LEVEL
            valueFrom:
              configMapKeyRef:
                name: app-config
                key: log-level
    - name: helper
      container:
        image: alpine
";

#[test]
fn test_configmap_context_beats_generic_name_handling() {
    // A `name: app-config` under `configMapKeyRef:` resolves via the
    // ConfigMap handler even though other handlers also care about
    // `name:` values
    let registry = Registry::new(Indices::new());
    let doc = DocumentContext::new(url("wf.yaml"), WORKFLOW);

    let detected = registry.detect(&doc, pos(15, 25)).unwrap();
    assert_eq!(detected.kind, ReferenceKind::ConfigMapKeyRef);
}

#[test]
fn test_detect_and_resolve_is_deterministic() {
    let registry = Registry::new(Indices::new());
    let doc = DocumentContext::new(url("wf.yaml"), WORKFLOW);
    let position = pos(7, 25); // template: helper

    let first = registry.detect_and_resolve(&doc, position);
    let second = registry.detect_and_resolve(&doc, position);
    assert_eq!(first.hover_markdown, second.hover_markdown);
    assert_eq!(first.exists, second.exists);
    assert_eq!(first.definition_location, second.definition_location);
}

#[test]
fn test_find_references_symmetric_within_document() {
    // The definition site and both use-sites of `helper` each produce the
    // identical set
    let registry = Registry::new(Indices::new());
    let doc = DocumentContext::new(url("wf.yaml"), WORKFLOW);
    let corpus = [&doc];

    let from_definition = registry.find_all_references(&doc, pos(17, 14), &corpus);
    let from_first_use = registry.find_all_references(&doc, pos(7, 25), &corpus);
    let from_second_use = registry.find_all_references(&doc, pos(9, 25), &corpus);

    assert_eq!(from_definition.len(), 3);
    assert_eq!(from_definition, from_first_use);
    assert_eq!(from_definition, from_second_use);
}

#[test]
fn test_find_references_symmetric_across_corpus() {
    // Across documents: a templateRef use in one workflow and the
    // definition in a WorkflowTemplate resource
    let caller = "\
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: call-shared
            templateRef:
              name: shared-wft
              template: deploy
";
    let shared = "\
kind: WorkflowTemplate
metadata:
  name: shared-wft
spec:
  templates:
    - name: deploy
      container:
        image: alpine
";
    let indices = Indices::new();
    let caller_uri = url("caller.yaml");
    let shared_uri = url("shared.yaml");
    index::ingest_document(&indices, &shared_uri, &ScanDocument::new(shared));

    let registry = Registry::new(indices);
    let caller_doc = DocumentContext::new(caller_uri, caller);
    let shared_doc = DocumentContext::new(shared_uri, shared);
    let corpus = [&caller_doc, &shared_doc];

    // From the templateRef use-site in the caller
    let from_use = registry.find_all_references(&caller_doc, pos(8, 26), &corpus);
    // From the definition site in the shared resource
    let from_def = registry.find_all_references(&shared_doc, pos(5, 14), &corpus);

    assert_eq!(from_use.len(), 2);
    assert_eq!(from_use, from_def);
    assert!(from_use.iter().any(|l| l.uri.path().ends_with("caller.yaml")));
    assert!(from_use.iter().any(|l| l.uri.path().ends_with("shared.yaml")));
}

#[test]
fn test_no_identity_no_references() {
    // A keyword has no cross-site identity
    let registry = Registry::new(Indices::new());
    let doc = DocumentContext::new(
        url("c/templates/x.yaml"),
        "{{- if .Values.on }}\nx: 1\n{{- end }}\n",
    );
    let references = registry.find_all_references(&doc, pos(0, 5), &[&doc]);
    assert!(references.is_empty());
}

// A handler that claims any position; used to prove guard-order priority
struct GreedyHandler {
    tag: &'static str,
}

impl Handler for GreedyHandler {
    fn name(&self) -> &'static str {
        self.tag
    }

    fn detect(&self, _doc: &DocumentContext, _position: Position) -> Option<DetectedReference> {
        Some(DetectedReference::new(
            Range::default(),
            ReferenceDetails::Keyword {
                word: self.tag.to_string(),
            },
        ))
    }

    fn resolve(&self, _doc: &DocumentContext, _reference: &DetectedReference) -> ResolvedReference {
        ResolvedReference {
            hover_markdown: Some(self.tag.to_string()),
            ..Default::default()
        }
    }
}

fn applies_always(_doc: &DocumentContext) -> bool {
    true
}

#[test]
fn test_first_guard_wins_regardless_of_handler_construction_order() {
    let doc = DocumentContext::new(url("x.yaml"), "a: 1\n");
    let position = pos(0, 0);

    let registry = Registry::with_guards(vec![
        Guard::new(
            "alpha",
            applies_always,
            vec![Box::new(GreedyHandler { tag: "alpha" })],
        ),
        Guard::new(
            "beta",
            applies_always,
            vec![Box::new(GreedyHandler { tag: "beta" })],
        ),
    ]);
    assert_eq!(
        registry.detect_and_resolve(&doc, position).hover_markdown,
        Some("alpha".to_string())
    );

    // Swapping the list swaps the winner: order is the declared priority
    let registry = Registry::with_guards(vec![
        Guard::new(
            "beta",
            applies_always,
            vec![Box::new(GreedyHandler { tag: "beta" })],
        ),
        Guard::new(
            "alpha",
            applies_always,
            vec![Box::new(GreedyHandler { tag: "alpha" })],
        ),
    ]);
    assert_eq!(
        registry.detect_and_resolve(&doc, position).hover_markdown,
        Some("beta".to_string())
    );
}

#[test]
fn test_handler_order_within_guard_is_priority() {
    let doc = DocumentContext::new(url("x.yaml"), "a: 1\n");
    let registry = Registry::with_guards(vec![Guard::new(
        "only",
        applies_always,
        vec![
            Box::new(GreedyHandler { tag: "first" }),
            Box::new(GreedyHandler { tag: "second" }),
        ],
    )]);
    assert_eq!(
        registry.detect_and_resolve(&doc, pos(0, 0)).hover_markdown,
        Some("first".to_string())
    );
}

struct DownRenderer;

#[async_trait]
impl Renderer for DownRenderer {
    async fn render(
        &self,
        _chart_root: &Path,
        _release: &str,
        _template_subset: Option<&str>,
        _overrides: &BTreeMap<String, String>,
    ) -> Result<RenderOutput, RenderFailure> {
        Err(RenderFailure::Unavailable("helm not installed".to_string()))
    }
}

#[tokio::test]
async fn test_renderer_failure_degrades_gracefully() {
    // Correlation is unavailable...
    let service = CorrelationService::new(Arc::new(DownRenderer), Duration::from_secs(30));
    let mapping = service
        .mapping_for(
            Path::new("/charts/demo"),
            "release",
            "templates/cm.yaml",
            "name: {{ .Values.n }}",
            &BTreeMap::new(),
        )
        .await;
    assert!(mapping.is_none());

    // ...while non-rendered resolution keeps working and never panics
    let registry = Registry::new(Indices::new());
    let doc = DocumentContext::new(url("wf.yaml"), WORKFLOW);
    let resolved = registry.detect_and_resolve(&doc, pos(7, 25));
    assert_eq!(resolved.exists, Some(true));

    // A rendered document without correlation resolves to empty, not a panic
    let rendered = DocumentContext::new(
        url("out.yaml"),
        "# Source: demo/templates/cm.yaml\nname: foo\n",
    );
    assert_eq!(rendered.dialect, Dialect::RenderedOutput);
    assert!(registry.detect_and_resolve(&rendered, pos(1, 2)).is_empty());
}
