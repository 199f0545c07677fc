//! LSP Backend implementation
//!
//! Thin adapters only: every feature method translates the protocol request
//! into one of the registry's three operations (or a correlation lookup for
//! rendered documents) and the result back into a protocol response. No
//! dialect-specific logic lives here.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::diagnostics::{
    collect_reference_diagnostics, collect_syntax_diagnostics, DiagnosticCollector,
};
use crate::document::Document;
use crate::index::{self, DefinitionLookup, Indices, DEFAULT_CHART_SCOPE};
use crate::registry::{Dialect, DocumentContext, Registry};
use crate::render::{CorrelationService, HelmRenderer, MappedPosition};

const RENDER_CACHE_TTL: Duration = Duration::from_secs(30);

/// The LSP backend that handles all language server requests
pub struct Backend {
    /// The LSP client for sending notifications
    client: Client,
    /// Map of document URIs to their state
    documents: Arc<RwLock<HashMap<Url, Document>>>,
    /// Definition indices shared with the registry
    indices: Arc<Indices>,
    /// The guarded handler registry
    registry: Arc<Registry>,
    /// Rendered-output correlation
    correlation: Arc<CorrelationService>,
    /// Workspace root, used to locate chart sources for rendered documents
    workspace_root: Arc<RwLock<Option<PathBuf>>>,
}

impl Backend {
    /// Create a new backend instance
    pub fn new(client: Client) -> Self {
        let indices = Indices::new();
        let registry = Arc::new(Registry::new(Arc::clone(&indices)));
        let correlation = Arc::new(CorrelationService::new(
            Arc::new(HelmRenderer::default()),
            RENDER_CACHE_TTL,
        ));
        Self {
            client,
            documents: Arc::new(RwLock::new(HashMap::new())),
            indices,
            registry,
            correlation,
            workspace_root: Arc::new(RwLock::new(None)),
        }
    }

    /// Snapshot a stored document into a detection context
    async fn context_for(&self, uri: &Url) -> Option<DocumentContext> {
        let documents = self.documents.read().await;
        let document = documents.get(uri)?;
        Some(DocumentContext::new(uri.clone(), &document.text))
    }

    /// Validate a document and publish diagnostics
    async fn validate_document(&self, uri: &Url, text: &str, version: Option<i32>) {
        let mut collector = DiagnosticCollector::new();
        collect_syntax_diagnostics(text, &mut collector);

        let doc = DocumentContext::new(uri.clone(), text);
        collect_reference_diagnostics(&self.registry, &doc, &mut collector);

        self.client
            .publish_diagnostics(uri.clone(), collector.into_diagnostics(), version)
            .await;
    }

    /// Harvest definitions from an open document into the indices
    fn ingest(&self, uri: &Url, text: &str) {
        let doc = DocumentContext::new(uri.clone(), text);
        index::ingest_document(&self.indices, uri, &doc.scan);

        if uri.path().ends_with("/values.yaml") {
            index::ingest_values(&self.indices, DEFAULT_CHART_SCOPE, uri, text);
        }
        if uri.path().ends_with("/Chart.yaml") {
            if let Ok(path) = uri.to_file_path() {
                index::ingest_chart_manifest(&self.indices, uri, &doc.scan, &path);
            }
        }
    }

    /// Resolve the chart root and chart-relative template path behind a
    /// rendered document's `# Source:` marker.
    async fn chart_source(&self, doc: &DocumentContext) -> Option<(PathBuf, String)> {
        let marker = (0..doc.scan.line_count()).find_map(|idx| {
            doc.scan
                .line(idx)?
                .trim()
                .strip_prefix("# Source:")
                .map(|p| p.trim().to_string())
        })?;
        // "# Source: <chart>/templates/x.yaml" is chart-name prefixed
        let (chart_name, relative) = marker.split_once('/')?;

        // The chart registry knows roots of every opened chart; fall back
        // to probing under the workspace root
        if let Some(chart) = self
            .indices
            .charts
            .lookup(index::OBJECT_SCOPE, chart_name)
        {
            if let Some(root) = chart.detail {
                return Some((PathBuf::from(root), relative.to_string()));
            }
        }

        let root = self.workspace_root.read().await.clone()?;
        let candidate = root.join(chart_name);
        let chart_root = if candidate.join("Chart.yaml").is_file() {
            candidate
        } else if root.join("Chart.yaml").is_file() {
            root
        } else {
            return None;
        };
        Some((chart_root, relative.to_string()))
    }

    /// Correlation fallback for a position in a rendered document.
    async fn rendered_lookup(
        &self,
        doc: &DocumentContext,
        position: Position,
    ) -> Option<(MappedPosition, Url)> {
        let (chart_root, relative) = self.chart_source(doc).await?;
        let source_path = chart_root.join(&relative);
        let source_text = tokio::fs::read_to_string(&source_path).await.ok()?;

        let mapped = self
            .correlation
            .position_lookup(
                &chart_root,
                "release",
                &relative,
                &source_text,
                &BTreeMap::new(),
                position.line as usize,
                position.character,
            )
            .await?;
        let uri = Url::from_file_path(&source_path).ok()?;
        Some((mapped, uri))
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(root_uri) = params.root_uri {
            if let Ok(path) = root_uri.to_file_path() {
                *self.workspace_root.write().await = Some(path);
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![
                        ".".to_string(),
                        "{".to_string(),
                        "\"".to_string(),
                        "|".to_string(),
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "yaml-gotmpl-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("Server initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("Server shutting down");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        let version = params.text_document.version;

        tracing::debug!("Document opened: {}", uri);

        {
            let mut docs = self.documents.write().await;
            docs.insert(uri.clone(), Document::new(text.clone(), version));
        }
        self.ingest(&uri, &text);
        self.validate_document(&uri, &text, Some(version)).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Full sync: the change carries the whole text
        if let Some(change) = params.content_changes.into_iter().next() {
            let text = change.text;

            tracing::debug!("Document changed: {}", uri);

            {
                let mut docs = self.documents.write().await;
                docs.insert(uri.clone(), Document::new(text.clone(), version));
            }
            self.ingest(&uri, &text);
            self.validate_document(&uri, &text, Some(version)).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!("Document saved: {}", uri);

        // A saved chart template invalidates its own render entry and the
        // whole-chart aggregate; siblings keep theirs
        if let Ok(path) = uri.to_file_path() {
            if let Some(pos) = path
                .components()
                .position(|c| c.as_os_str() == "templates")
            {
                let chart_root: PathBuf = path.components().take(pos).collect();
                let relative: PathBuf = path.components().skip(pos).collect();
                self.correlation
                    .invalidate_template(&chart_root, &relative.to_string_lossy())
                    .await;
            }
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!("Document closed: {}", uri);

        {
            let mut docs = self.documents.write().await;
            docs.remove(&uri);
        }
        self.indices.remove_document(&uri);
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let doc = match self.context_for(&uri).await {
            Some(doc) => doc,
            None => return Ok(None),
        };

        if doc.dialect == Dialect::RenderedOutput {
            let hover = self
                .rendered_lookup(&doc, position)
                .await
                .map(|(mapped, source_uri)| {
                    let value = match &mapped.expression {
                        Some(expression) => format!(
                            "Rendered from `{}`\n\n{}:{} (confidence {:.2})",
                            expression,
                            source_uri.path(),
                            mapped.position.line + 1,
                            mapped.confidence
                        ),
                        None => format!(
                            "Rendered from {}:{} (confidence {:.2})",
                            source_uri.path(),
                            mapped.position.line + 1,
                            mapped.confidence
                        ),
                    };
                    Hover {
                        contents: HoverContents::Markup(MarkupContent {
                            kind: MarkupKind::Markdown,
                            value,
                        }),
                        range: None,
                    }
                });
            return Ok(hover);
        }

        let resolved = self.registry.detect_and_resolve(&doc, position);
        Ok(resolved.hover_markdown.map(|value| Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            }),
            range: None,
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let doc = match self.context_for(&uri).await {
            Some(doc) => doc,
            None => return Ok(None),
        };

        if doc.dialect == Dialect::RenderedOutput {
            let location =
                self.rendered_lookup(&doc, position)
                    .await
                    .map(|(mapped, source_uri)| {
                        GotoDefinitionResponse::Scalar(Location {
                            uri: source_uri,
                            range: Range {
                                start: mapped.position,
                                end: mapped.position,
                            },
                        })
                    });
            return Ok(location);
        }

        let resolved = self.registry.detect_and_resolve(&doc, position);
        Ok(resolved
            .definition_location
            .map(GotoDefinitionResponse::Scalar))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let doc = match self.context_for(&uri).await {
            Some(doc) => doc,
            None => return Ok(None),
        };

        let items = self.registry.provide_completions(&doc, position);
        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(CompletionResponse::Array(items)))
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let doc = match self.context_for(&uri).await {
            Some(doc) => doc,
            None => return Ok(None),
        };

        // The corpus is every open document
        let corpus: Vec<DocumentContext> = {
            let documents = self.documents.read().await;
            documents
                .iter()
                .map(|(uri, document)| DocumentContext::new(uri.clone(), &document.text))
                .collect()
        };
        let corpus_refs: Vec<&DocumentContext> = corpus.iter().collect();

        let locations = self
            .registry
            .find_all_references(&doc, position, &corpus_refs);
        if locations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(locations))
        }
    }
}
