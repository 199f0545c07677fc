//! Definition indices
//!
//! Lookup collaborators answering "does X exist / where is X defined", one
//! family per entity kind. The core resolvers only query these through
//! [`DefinitionLookup`]; they never walk the filesystem to build them. The
//! in-memory implementation here is explicit, constructor-injected state
//! with an `initialize`/`update`/`clear` lifecycle — no process-wide
//! singletons.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tower_lsp::lsp_types::{Position, Range, Url};

use crate::scan::{self, ScanDocument};

/// Scope key under which object names (as opposed to their keys) are stored
pub const OBJECT_SCOPE: &str = "";

/// The default chart scope used when no chart registry entry applies
pub const DEFAULT_CHART_SCOPE: &str = "";

/// A named definition with its location
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub uri: Url,
    pub range: Range,
    /// Free-form detail: a default value, a data preview, a doc comment
    pub detail: Option<String>,
}

/// Lookup service contract shared by every index family
pub trait DefinitionLookup: Send + Sync {
    fn lookup(&self, scope_key: &str, name: &str) -> Option<Definition>;
    fn list_all(&self, scope_key: &str) -> Vec<Definition>;
}

/// In-memory index: scope key -> ordered definitions
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<String, Vec<Definition>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index contents.
    pub fn initialize(&self, entries: HashMap<String, Vec<Definition>>) {
        *self.entries.write().unwrap() = entries;
    }

    /// Replace one scope's definitions.
    pub fn update(&self, scope_key: &str, definitions: Vec<Definition>) {
        self.entries
            .write()
            .unwrap()
            .insert(scope_key.to_string(), definitions);
    }

    /// Append a definition to a scope.
    pub fn add(&self, scope_key: &str, definition: Definition) {
        self.entries
            .write()
            .unwrap()
            .entry(scope_key.to_string())
            .or_default()
            .push(definition);
    }

    /// Drop every scope.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Drop all definitions recorded from one document.
    pub fn remove_uri(&self, uri: &Url) {
        let mut entries = self.entries.write().unwrap();
        for definitions in entries.values_mut() {
            definitions.retain(|d| &d.uri != uri);
        }
    }
}

impl DefinitionLookup for MemoryIndex {
    fn lookup(&self, scope_key: &str, name: &str) -> Option<Definition> {
        // Later registrations shadow earlier ones
        self.entries
            .read()
            .unwrap()
            .get(scope_key)?
            .iter()
            .rev()
            .find(|d| d.name == name)
            .cloned()
    }

    fn list_all(&self, scope_key: &str) -> Vec<Definition> {
        self.entries
            .read()
            .unwrap()
            .get(scope_key)
            .cloned()
            .unwrap_or_default()
    }
}

/// The index families the registry resolves against
#[derive(Debug, Default)]
pub struct Indices {
    /// Workflow template definitions; scope = defining document URI
    pub templates: MemoryIndex,
    /// Parameter definitions; scope = `<template>/inputs` or `workflow`
    pub parameters: MemoryIndex,
    /// Artifact definitions; scope = `<template>/outputs`
    pub artifacts: MemoryIndex,
    /// ConfigMap names (scope [`OBJECT_SCOPE`]) and keys (scope = object name)
    pub config_maps: MemoryIndex,
    /// Secret names and keys, same scoping as `config_maps`
    pub secrets: MemoryIndex,
    /// Chart registry: chart ids to chart roots
    pub charts: MemoryIndex,
    /// Values definitions; scope = chart id, name = dotted path
    pub values: MemoryIndex,
    /// Named template definitions; scope = chart id
    pub named_templates: MemoryIndex,
}

impl Indices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drop everything, across all families.
    pub fn clear_all(&self) {
        self.templates.clear();
        self.parameters.clear();
        self.artifacts.clear();
        self.config_maps.clear();
        self.secrets.clear();
        self.charts.clear();
        self.values.clear();
        self.named_templates.clear();
    }

    /// Forget all definitions contributed by one document.
    pub fn remove_document(&self, uri: &Url) {
        self.templates.remove_uri(uri);
        self.parameters.remove_uri(uri);
        self.artifacts.remove_uri(uri);
        self.config_maps.remove_uri(uri);
        self.secrets.remove_uri(uri);
        self.charts.remove_uri(uri);
        self.values.remove_uri(uri);
        self.named_templates.remove_uri(uri);
    }
}

fn line_range(scan: &ScanDocument, line_idx: usize) -> Range {
    let len = scan
        .line(line_idx)
        .map(crate::document::utf16_len)
        .unwrap_or(0);
    Range {
        start: Position {
            line: line_idx as u32,
            character: 0,
        },
        end: Position {
            line: line_idx as u32,
            character: len,
        },
    }
}

/// Harvest definitions from an open document into the indices. This is
/// adapter-side convenience for live documents; persistent index building is
/// a separate collaborator's job.
pub fn ingest_document(indices: &Indices, uri: &Url, scan: &ScanDocument) {
    indices.remove_document(uri);

    for idx in 0..scan.line_count() {
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        if scan::is_blank(line) || scan::is_comment(line) {
            continue;
        }
        let info = match scan.info(idx) {
            Some(i) => i.clone(),
            None => continue,
        };

        ingest_kube_object(indices, uri, scan, idx, &info);
        ingest_workflow_definitions(indices, uri, scan, idx, &info);
        ingest_named_templates(indices, uri, scan, idx, line);
    }
}

/// ConfigMap/Secret object names and their data keys.
fn ingest_kube_object(
    indices: &Indices,
    uri: &Url,
    scan: &ScanDocument,
    idx: usize,
    info: &scan::LineInfo,
) {
    let index = match info.kind.as_deref() {
        Some("ConfigMap") => &indices.config_maps,
        Some("Secret") => &indices.secrets,
        _ => return,
    };
    let line = scan.line(idx).unwrap_or_default();
    let kv = match scan::parse_key_value(line) {
        Some(kv) => kv,
        None => return,
    };

    if kv.key == "name" {
        if let Some((_, header)) = scan.enclosing_block_key(idx) {
            if header == "metadata" && !kv.value.is_empty() {
                index.add(
                    OBJECT_SCOPE,
                    Definition {
                        name: kv.value,
                        uri: uri.clone(),
                        range: line_range(scan, idx),
                        detail: None,
                    },
                );
            }
        }
        return;
    }

    // Keys live directly under `data:` / `stringData:` / `binaryData:`
    if let Some((_, header)) = scan.enclosing_block_key(idx) {
        if matches!(header.as_str(), "data" | "stringData" | "binaryData") {
            if let Some(object_name) = segment_object_name(scan, info.segment) {
                index.add(
                    &object_name,
                    Definition {
                        name: kv.key,
                        uri: uri.clone(),
                        range: line_range(scan, idx),
                        detail: (!kv.value.is_empty()).then(|| kv.value.clone()),
                    },
                );
            }
        }
    }
}

/// The `metadata: name:` value of the given document segment. The last
/// occurrence in scan order is authoritative.
fn segment_object_name(scan: &ScanDocument, segment: usize) -> Option<String> {
    let mut found = None;
    for idx in 0..scan.line_count() {
        if scan.info(idx).map(|i| i.segment) != Some(segment) {
            continue;
        }
        let line = scan.line(idx)?;
        if let Some(kv) = scan::parse_key_value(line) {
            if kv.key == "name" && !kv.value.is_empty() {
                if let Some((_, header)) = scan.enclosing_block_key(idx) {
                    if header == "metadata" {
                        found = Some(kv.value);
                    }
                }
            }
        }
    }
    found
}

/// Workflow templates and their input/output parameter definitions.
fn ingest_workflow_definitions(
    indices: &Indices,
    uri: &Url,
    scan: &ScanDocument,
    idx: usize,
    info: &scan::LineInfo,
) {
    match info.kind.as_deref() {
        Some("Workflow") | Some("WorkflowTemplate") | Some("CronWorkflow") => {}
        _ => return,
    }
    let line = scan.line(idx).unwrap_or_default();
    let kv = match scan::parse_key_value(line) {
        Some(kv) => kv,
        None => return,
    };
    if kv.key != "name" || !kv.list_item || kv.value.is_empty() {
        return;
    }

    let chain = scan.block_chain(idx, 3);
    let headers: Vec<&str> = chain.iter().map(|(_, k)| k.as_str()).collect();

    if headers.first() == Some(&"templates") {
        let definition = Definition {
            name: kv.value,
            uri: uri.clone(),
            range: line_range(scan, idx),
            detail: scan.leading_comment(idx),
        };
        // Also index under the resource name so `templateRef:` lookups
        // from other documents resolve
        if let Some(resource) = segment_object_name(scan, info.segment) {
            indices.templates.add(&resource, definition.clone());
        }
        indices.templates.add(uri.as_str(), definition);
        return;
    }

    if headers.first() == Some(&"parameters") {
        let scope = match (headers.get(1), &info.template) {
            (Some(&"inputs"), Some(t)) => format!("{}/inputs", t),
            (Some(&"outputs"), Some(t)) => format!("{}/outputs", t),
            (Some(&"arguments"), _) if headers.get(2) == Some(&"spec") => "workflow".to_string(),
            (Some(&"arguments"), None) => "workflow".to_string(),
            _ => return,
        };
        let detail = scan
            .find_in_block(idx, "default")
            .map(|(_, v)| format!("default: {}", v))
            .or_else(|| scan.leading_comment(idx));
        indices.parameters.add(
            &scope,
            Definition {
                name: kv.value,
                uri: uri.clone(),
                range: line_range(scan, idx),
                detail,
            },
        );
        return;
    }

    if headers.first() == Some(&"artifacts") {
        if let (Some(&"outputs"), Some(t)) = (headers.get(1), &info.template) {
            indices.artifacts.add(
                &format!("{}/outputs", t),
                Definition {
                    name: kv.value,
                    uri: uri.clone(),
                    range: line_range(scan, idx),
                    detail: None,
                },
            );
        }
    }
}

/// `{{- define "name" }}` definitions in chart templates.
fn ingest_named_templates(indices: &Indices, uri: &Url, scan: &ScanDocument, idx: usize, line: &str) {
    for span in scan::expressions_in_line(line) {
        if span.head() != Some("define") && span.head() != Some("block") {
            continue;
        }
        if let Some(name) = quoted_argument(&span.inner) {
            indices.named_templates.add(
                DEFAULT_CHART_SCOPE,
                Definition {
                    name,
                    uri: uri.clone(),
                    range: line_range(scan, idx),
                    detail: None,
                },
            );
        }
    }
}

/// First double-quoted argument of an expression's inner text.
pub fn quoted_argument(inner: &str) -> Option<String> {
    let start = inner.find('"')?;
    let rest = &inner[start + 1..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Register a chart in the chart registry from its Chart.yaml manifest.
/// The definition's detail carries the chart root directory.
pub fn ingest_chart_manifest(
    indices: &Indices,
    uri: &Url,
    scan: &ScanDocument,
    manifest_path: &Path,
) {
    let root = match manifest_path.parent() {
        Some(p) => p,
        None => return,
    };
    for idx in 0..scan.line_count() {
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        if let Some(kv) = scan::parse_key_value(line) {
            if kv.key == "name" && !kv.list_item && scan::indent_of(line) == 0 && !kv.value.is_empty()
            {
                indices.charts.add(
                    OBJECT_SCOPE,
                    Definition {
                        name: kv.value,
                        uri: uri.clone(),
                        range: line_range(scan, idx),
                        detail: Some(root.display().to_string()),
                    },
                );
                return;
            }
        }
    }
}

/// Flatten a values document into dotted-path definitions under `scope`.
pub fn ingest_values(indices: &Indices, scope: &str, uri: &Url, text: &str) {
    let value: serde_yaml::Value = match serde_yaml::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    let mut definitions = Vec::new();
    flatten_values(&value, String::new(), uri, &mut definitions);
    indices.values.update(scope, definitions);
}

fn flatten_values(
    value: &serde_yaml::Value,
    prefix: String,
    uri: &Url,
    out: &mut Vec<Definition>,
) {
    if let Some(mapping) = value.as_mapping() {
        for (key, child) in mapping {
            let key = match key.as_str() {
                Some(k) => k,
                None => continue,
            };
            let path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            };
            let detail = match child {
                serde_yaml::Value::Mapping(_) => None,
                other => serde_yaml::to_string(other)
                    .ok()
                    .map(|s| s.trim().to_string()),
            };
            out.push(Definition {
                name: path.clone(),
                uri: uri.clone(),
                range: Range::default(),
                detail,
            });
            flatten_values(child, path, uri, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_uri() -> Url {
        Url::parse("file:///tmp/test.yaml").unwrap()
    }

    #[test]
    fn test_lookup_last_registration_shadows() {
        let index = MemoryIndex::new();
        let uri = test_uri();
        for detail in ["first", "second"] {
            index.add(
                OBJECT_SCOPE,
                Definition {
                    name: "x".to_string(),
                    uri: uri.clone(),
                    range: Range::default(),
                    detail: Some(detail.to_string()),
                },
            );
        }
        let def = index.lookup(OBJECT_SCOPE, "x").unwrap();
        assert_eq!(def.detail.as_deref(), Some("second"));
    }

    #[test]
    fn test_update_replaces_scope() {
        let index = MemoryIndex::new();
        let uri = test_uri();
        index.add(
            "s",
            Definition {
                name: "a".to_string(),
                uri: uri.clone(),
                range: Range::default(),
                detail: None,
            },
        );
        index.update("s", Vec::new());
        assert!(index.lookup("s", "a").is_none());
        assert!(index.list_all("s").is_empty());
    }

    #[test]
    fn test_ingest_configmap() {
        let text = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
data:
  log-level: debug
  timeout: \"30\"
";
        let indices = Indices::new();
        let scan = ScanDocument::new(text);
        ingest_document(&indices, &test_uri(), &scan);

        assert!(indices.config_maps.lookup(OBJECT_SCOPE, "app-config").is_some());
        let key = indices.config_maps.lookup("app-config", "log-level").unwrap();
        assert_eq!(key.detail.as_deref(), Some("debug"));
        assert!(indices.config_maps.lookup("app-config", "missing").is_none());
    }

    #[test]
    fn test_ingest_workflow_templates_and_parameters() {
        let text = "\
apiVersion: argoproj.io/v1alpha1
kind: Workflow
spec:
  templates:
    - name: main
      inputs:
        parameters:
          - name: msg
            default: hello
    - name: helper
";
        let indices = Indices::new();
        let scan = ScanDocument::new(text);
        let uri = test_uri();
        ingest_document(&indices, &uri, &scan);

        assert!(indices.templates.lookup(uri.as_str(), "main").is_some());
        assert!(indices.templates.lookup(uri.as_str(), "helper").is_some());
        let param = indices.parameters.lookup("main/inputs", "msg").unwrap();
        assert_eq!(param.detail.as_deref(), Some("default: hello"));
    }

    #[test]
    fn test_ingest_named_templates() {
        let text = "{{- define \"chart.labels\" -}}\napp: x\n{{- end }}\n";
        let indices = Indices::new();
        let scan = ScanDocument::new(text);
        ingest_document(&indices, &test_uri(), &scan);
        assert!(indices
            .named_templates
            .lookup(DEFAULT_CHART_SCOPE, "chart.labels")
            .is_some());
    }

    #[test]
    fn test_ingest_values_flattens_paths() {
        let indices = Indices::new();
        ingest_values(
            &indices,
            DEFAULT_CHART_SCOPE,
            &test_uri(),
            "image:\n  repository: nginx\n  tag: latest\nreplicas: 2\n",
        );
        let def = indices
            .values
            .lookup(DEFAULT_CHART_SCOPE, "image.repository")
            .unwrap();
        assert_eq!(def.detail.as_deref(), Some("nginx"));
        assert!(indices.values.lookup(DEFAULT_CHART_SCOPE, "image").is_some());
        assert!(indices.values.lookup(DEFAULT_CHART_SCOPE, "replicas").is_some());
        assert!(indices.values.lookup(DEFAULT_CHART_SCOPE, "bogus").is_none());
    }

    #[test]
    fn test_remove_document() {
        let indices = Indices::new();
        let uri = test_uri();
        indices.config_maps.add(
            OBJECT_SCOPE,
            Definition {
                name: "cm".to_string(),
                uri: uri.clone(),
                range: Range::default(),
                detail: None,
            },
        );
        indices.remove_document(&uri);
        assert!(indices.config_maps.lookup(OBJECT_SCOPE, "cm").is_none());
    }

    #[test]
    fn test_ingest_chart_manifest() {
        let indices = Indices::new();
        let text = "apiVersion: v2\nname: mychart\nversion: 1.0.0\n";
        let scan = ScanDocument::new(text);
        ingest_chart_manifest(
            &indices,
            &test_uri(),
            &scan,
            Path::new("/charts/mychart/Chart.yaml"),
        );
        let chart = indices.charts.lookup(OBJECT_SCOPE, "mychart").unwrap();
        assert_eq!(chart.detail.as_deref(), Some("/charts/mychart"));
        assert_eq!(chart.range.start.line, 1);
    }

    #[test]
    fn test_quoted_argument() {
        assert_eq!(
            quoted_argument("include \"chart.name\" ."),
            Some("chart.name".to_string())
        );
        assert_eq!(quoted_argument("end"), None);
    }
}
