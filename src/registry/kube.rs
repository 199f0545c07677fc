//! ConfigMap/Secret reference handling
//!
//! A bare `name:` value means nothing on its own — these detectors require
//! the corroborating block context (`configMapKeyRef:`, `secretRef:`, a
//! `volumes:` entry) before claiming a token, and report the exact
//! name/key pair a resolver can check against the object indices.

use std::sync::Arc;

use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Position,
};

use crate::document::utf16_col_to_byte;
use crate::index::{DefinitionLookup, Indices, OBJECT_SCOPE};
use crate::refs::{
    DetectedReference, KubeAccess, KubeTarget, ReferenceDetails, ResolvedReference,
};
use crate::scan;

use super::{DocumentContext, Handler};

/// Detects and resolves ConfigMap or Secret references, one instance per
/// target object kind.
pub struct KubeRefHandler {
    target: KubeTarget,
    indices: Arc<Indices>,
}

impl KubeRefHandler {
    pub fn config_maps(indices: Arc<Indices>) -> Self {
        Self {
            target: KubeTarget::ConfigMap,
            indices,
        }
    }

    pub fn secrets(indices: Arc<Indices>) -> Self {
        Self {
            target: KubeTarget::Secret,
            indices,
        }
    }

    fn keys(&self) -> (&'static str, &'static str, &'static str) {
        match self.target {
            KubeTarget::ConfigMap => ("configMapKeyRef", "configMapRef", "configMap"),
            KubeTarget::Secret => ("secretKeyRef", "secretRef", "secret"),
        }
    }

    fn index(&self) -> &dyn DefinitionLookup {
        match self.target {
            KubeTarget::ConfigMap => &self.indices.config_maps,
            KubeTarget::Secret => &self.indices.secrets,
        }
    }

    fn object_label(&self) -> &'static str {
        match self.target {
            KubeTarget::ConfigMap => "ConfigMap",
            KubeTarget::Secret => "Secret",
        }
    }
}

impl Handler for KubeRefHandler {
    fn name(&self) -> &'static str {
        match self.target {
            KubeTarget::ConfigMap => "configmap-ref",
            KubeTarget::Secret => "secret-ref",
        }
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line_idx = position.line as usize;
        let line = doc.scan.line(line_idx)?;
        let kv = scan::parse_key_value(line)?;
        // The cursor must sit on the value, not the key
        if token.start < kv.value_start {
            return None;
        }

        let (keyref_key, envfrom_key, volume_key) = self.keys();
        let (header_idx, header) = doc.scan.enclosing_block_key(line_idx)?;

        let details = if header == keyref_key {
            match kv.key.as_str() {
                "name" => Some(ReferenceDetails::KubeRef {
                    target: self.target,
                    access: KubeAccess::KeyRef,
                    name: token.text.clone(),
                    key: None,
                }),
                "key" => {
                    // The sibling `name:` names the object; without it the
                    // key is ambiguous and stays unmatched
                    let (_, name) = doc.scan.find_in_block(header_idx, "name")?;
                    Some(ReferenceDetails::KubeRef {
                        target: self.target,
                        access: KubeAccess::KeyRef,
                        name,
                        key: Some(token.text.clone()),
                    })
                }
                _ => None,
            }
        } else if header == envfrom_key && kv.key == "name" {
            // envFrom:
            //   - configMapRef:
            //       name: app-config
            let chain = doc.scan.block_chain(line_idx, 2);
            if chain.get(1).map(|(_, k)| k.as_str()) == Some("envFrom") {
                Some(ReferenceDetails::KubeRef {
                    target: self.target,
                    access: KubeAccess::EnvFrom,
                    name: token.text.clone(),
                    key: None,
                })
            } else {
                None
            }
        } else if header == volume_key {
            // volumes:
            //   - name: cfg
            //     configMap:
            //       name: app-config
            //       items:
            //         - key: log-level
            let chain = doc.scan.block_chain(line_idx, 3);
            let in_volumes = chain.iter().any(|(_, k)| k == "volumes");
            if in_volumes && (kv.key == "name" || kv.key == "secretName") {
                Some(ReferenceDetails::KubeRef {
                    target: self.target,
                    access: KubeAccess::Volume,
                    name: token.text.clone(),
                    key: None,
                })
            } else {
                None
            }
        } else if header == "items" && kv.key == "key" {
            // A key projected from a volume source
            let chain = doc.scan.block_chain(line_idx, 3);
            let source = chain.iter().find(|(_, k)| k == volume_key)?;
            let name_key = match self.target {
                KubeTarget::ConfigMap => "name",
                KubeTarget::Secret => "secretName",
            };
            let (_, name) = doc.scan.find_in_block(source.0, name_key)?;
            Some(ReferenceDetails::KubeRef {
                target: self.target,
                access: KubeAccess::Volume,
                name,
                key: Some(token.text.clone()),
            })
        } else {
            None
        };

        details.map(|d| DetectedReference::new(token.range(line), d))
    }

    fn resolve(&self, _doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let (name, key) = match &reference.details {
            ReferenceDetails::KubeRef {
                target, name, key, ..
            } if *target == self.target => (name, key),
            // Not this handler's payload
            _ => return ResolvedReference::empty(),
        };

        let index = self.index();
        // With no objects indexed at all, "missing" cannot be told apart
        // from "not yet loaded" — stay silent rather than guess
        if index.list_all(OBJECT_SCOPE).is_empty() {
            return ResolvedReference::empty();
        }
        match key {
            Some(key) => match index.lookup(name, key) {
                Some(definition) => ResolvedReference {
                    hover_markdown: Some(format!(
                        "**{} key** `{}` in `{}`{}",
                        self.object_label(),
                        key,
                        name,
                        definition
                            .detail
                            .as_deref()
                            .map(|d| format!("\n\n`{}`", d))
                            .unwrap_or_default()
                    )),
                    definition_location: Some(tower_lsp::lsp_types::Location {
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
            },
            None => match index.lookup(OBJECT_SCOPE, name) {
                Some(definition) => {
                    let keys: Vec<String> = index
                        .list_all(name)
                        .into_iter()
                        .map(|d| d.name)
                        .collect();
                    let mut hover = format!("**{}** `{}`", self.object_label(), name);
                    if !keys.is_empty() {
                        hover.push_str(&format!("\n\nKeys: {}", keys.join(", ")));
                    }
                    ResolvedReference {
                        hover_markdown: Some(hover),
                        definition_location: Some(tower_lsp::lsp_types::Location {
                            uri: definition.uri,
                            range: definition.range,
                        }),
                        exists: Some(true),
                        completions: None,
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
        let line_idx = position.line as usize;
        let line = match doc.scan.line(line_idx) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let kv = match scan::parse_key_value(line) {
            Some(kv) => kv,
            None => return Vec::new(),
        };
        let byte = match utf16_col_to_byte(line, position.character) {
            Some(b) => b,
            None => return Vec::new(),
        };
        if byte < kv.value_start.min(line.len()) {
            return Vec::new();
        }

        let (keyref_key, envfrom_key, _) = self.keys();
        let header = match doc.scan.enclosing_block_key(line_idx) {
            Some((idx, key)) => (idx, key),
            None => return Vec::new(),
        };

        if header.1 == keyref_key && kv.key == "key" {
            // Complete keys of the sibling-named object
            if let Some((_, name)) = doc.scan.find_in_block(header.0, "name") {
                return self
                    .index()
                    .list_all(&name)
                    .into_iter()
                    .map(|d| CompletionItem {
                        label: d.name,
                        kind: Some(CompletionItemKind::FIELD),
                        detail: d.detail,
                        ..Default::default()
                    })
                    .collect();
            }
        } else if (header.1 == keyref_key || header.1 == envfrom_key) && kv.key == "name" {
            return self
                .index()
                .list_all(OBJECT_SCOPE)
                .into_iter()
                .map(|d| CompletionItem {
                    label: d.name,
                    kind: Some(CompletionItemKind::VALUE),
                    detail: Some(self.object_label().to_string()),
                    ..Default::default()
                })
                .collect();
        }
        Vec::new()
    }
}
