//! Workflow-manifest reference handling
//!
//! Detectors for the workflow-orchestration dialect: template names,
//! input/output parameters, step/task outputs, `workflow.*` variables and
//! `{{item}}` loop variables. Resolution prefers a scan of the open
//! document (its definitions are authoritative for itself) and falls back
//! to the injected indices for cross-document lookups.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, Location, Position, Range};

use crate::catalog;
use crate::document::utf16_col_to_byte;
use crate::index::{DefinitionLookup, Indices};
use crate::refs::{
    DetectedReference, OutputKind, ParameterScope, ReferenceDetails, ResolvedReference, StepSource,
};
use crate::scan::{self, ScanDocument};

use super::{DocumentContext, Handler};

lazy_static! {
    static ref PARAM_TOKEN_RE: Regex =
        Regex::new(r"^(inputs|outputs)\.parameters\.([A-Za-z0-9_\-]+)$").unwrap();
    static ref STEP_OUTPUT_RE: Regex = Regex::new(
        r"^(steps|tasks)\.([A-Za-z0-9_\-]+)\.outputs\.(parameters|artifacts|result)(?:\.([A-Za-z0-9_\-]+))?$"
    )
    .unwrap();
}

fn line_location(doc: &DocumentContext, line_idx: usize) -> Location {
    let len = doc
        .scan
        .line(line_idx)
        .map(crate::document::utf16_len)
        .unwrap_or(0);
    Location {
        uri: doc.uri.clone(),
        range: Range {
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

/// Find a `- name: <name>` line whose direct enclosing block is `templates:`.
/// The last occurrence in scan order is authoritative.
fn find_template_definition(scan: &ScanDocument, name: &str) -> Option<usize> {
    let mut found = None;
    for idx in 0..scan.line_count() {
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        let kv = match scan::parse_key_value(line) {
            Some(kv) => kv,
            None => continue,
        };
        if kv.key == "name" && kv.list_item && kv.value == name {
            if let Some((_, header)) = scan.enclosing_block_key(idx) {
                if header == "templates" {
                    found = Some(idx);
                }
            }
        }
    }
    found
}

/// Find a parameter definition `- name: <name>` under
/// `<dir>: parameters:` inside the given template.
fn find_parameter_definition(
    scan: &ScanDocument,
    template: &str,
    dir: &str,
    name: &str,
) -> Option<usize> {
    let mut found = None;
    for idx in 0..scan.line_count() {
        if scan.info(idx).and_then(|i| i.template.clone()).as_deref() != Some(template) {
            continue;
        }
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        let kv = match scan::parse_key_value(line) {
            Some(kv) => kv,
            None => continue,
        };
        if kv.key != "name" || !kv.list_item || kv.value != name {
            continue;
        }
        let chain = scan.block_chain(idx, 2);
        if chain.first().map(|(_, k)| k.as_str()) == Some("parameters")
            && chain.get(1).map(|(_, k)| k.as_str()) == Some(dir)
        {
            found = Some(idx);
        }
    }
    found
}

/// Find an artifact definition under `outputs: artifacts:` in a template.
fn find_artifact_definition(scan: &ScanDocument, template: &str, name: &str) -> Option<usize> {
    let mut found = None;
    for idx in 0..scan.line_count() {
        if scan.info(idx).and_then(|i| i.template.clone()).as_deref() != Some(template) {
            continue;
        }
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        let kv = match scan::parse_key_value(line) {
            Some(kv) => kv,
            None => continue,
        };
        if kv.key != "name" || !kv.list_item || kv.value != name {
            continue;
        }
        let chain = scan.block_chain(idx, 2);
        if chain.first().map(|(_, k)| k.as_str()) == Some("artifacts")
            && chain.get(1).map(|(_, k)| k.as_str()) == Some("outputs")
        {
            found = Some(idx);
        }
    }
    found
}

/// Find a step/task entry `- name: <step>` inside the given template.
fn find_step_definition(
    scan: &ScanDocument,
    template: Option<&str>,
    source: StepSource,
    step: &str,
) -> Option<usize> {
    let section = match source {
        StepSource::Step => "steps",
        StepSource::Task => "tasks",
    };
    let mut found = None;
    for idx in 0..scan.line_count() {
        if let Some(t) = template {
            if scan.info(idx).and_then(|i| i.template.clone()).as_deref() != Some(t) {
                continue;
            }
        }
        let line = match scan.line(idx) {
            Some(l) => l,
            None => continue,
        };
        let kv = match scan::parse_key_value(line) {
            Some(kv) => kv,
            None => continue,
        };
        if kv.key != "name" || !kv.list_item || kv.value != step {
            continue;
        }
        let chain = scan.block_chain(idx, 3);
        if chain.iter().any(|(_, k)| k == section) {
            found = Some(idx);
        }
    }
    found
}

/// Handles `template:` references, `templateRef:` pairs, and template
/// definition sites under `templates:`.
pub struct TemplateHandler {
    indices: Arc<Indices>,
}

impl TemplateHandler {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }
}

impl Handler for TemplateHandler {
    fn name(&self) -> &'static str {
        "workflow-template"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line_idx = position.line as usize;
        let line = doc.scan.line(line_idx)?;
        let kv = scan::parse_key_value(line)?;
        if token.start < kv.value_start {
            return None;
        }

        let details = match kv.key.as_str() {
            "template" => {
                let (header_idx, header) = doc.scan.enclosing_block_key(line_idx)?;
                if header == "templateRef" {
                    let (_, resource) = doc.scan.find_in_block(header_idx, "name")?;
                    Some(ReferenceDetails::TemplateRef {
                        resource,
                        template: token.text.clone(),
                    })
                } else {
                    // Only claim `template:` inside a step/task entry
                    let chain = doc.scan.block_chain(line_idx, 4);
                    chain
                        .iter()
                        .any(|(_, k)| matches!(k.as_str(), "steps" | "tasks" | "dag" | "hooks"))
                        .then(|| ReferenceDetails::Template {
                            name: token.text.clone(),
                            definition_site: false,
                            comment: None,
                        })
                }
            }
            "name" if kv.list_item => {
                let (_, header) = doc.scan.enclosing_block_key(line_idx)?;
                (header == "templates").then(|| ReferenceDetails::Template {
                    name: token.text.clone(),
                    definition_site: true,
                    comment: doc.scan.leading_comment(line_idx),
                })
            }
            _ => None,
        };

        details.map(|d| DetectedReference::new(token.range(line), d))
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        match &reference.details {
            ReferenceDetails::Template {
                name,
                definition_site: true,
                comment,
            } => ResolvedReference {
                hover_markdown: Some(format!(
                    "**Template** `{}`{}",
                    name,
                    comment
                        .as_deref()
                        .map(|c| format!("\n\n{}", c))
                        .unwrap_or_default()
                )),
                exists: Some(true),
                ..Default::default()
            },
            ReferenceDetails::Template {
                name,
                definition_site: false,
                ..
            } => match find_template_definition(&doc.scan, name) {
                Some(def_idx) => {
                    let comment = doc.scan.leading_comment(def_idx);
                    ResolvedReference {
                        hover_markdown: Some(format!(
                            "**Template** `{}`{}",
                            name,
                            comment
                                .map(|c| format!("\n\n{}", c))
                                .unwrap_or_default()
                        )),
                        definition_location: Some(line_location(doc, def_idx)),
                        exists: Some(true),
                        completions: None,
                    }
                }
                None => match self.indices.templates.lookup(doc.uri.as_str(), name) {
                    Some(definition) => ResolvedReference {
                        hover_markdown: Some(format!("**Template** `{}`", name)),
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
                },
            },
            ReferenceDetails::TemplateRef { resource, template } => {
                match self.indices.templates.lookup(resource, template) {
                    Some(definition) => ResolvedReference {
                        hover_markdown: Some(format!(
                            "**Template** `{}` in `{}`",
                            template, resource
                        )),
                        definition_location: Some(Location {
                            uri: definition.uri,
                            range: definition.range,
                        }),
                        exists: Some(true),
                        completions: None,
                    },
                    // The referenced resource isn't indexed: unverifiable,
                    // not missing
                    None if self.indices.templates.list_all(resource).is_empty() => {
                        ResolvedReference {
                            hover_markdown: Some(format!(
                                "**Template** `{}` in `{}`",
                                template, resource
                            )),
                            ..Default::default()
                        }
                    }
                    None => ResolvedReference {
                        exists: Some(false),
                        ..Default::default()
                    },
                }
            }
            _ => ResolvedReference::empty(),
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
        if kv.key != "template" {
            return Vec::new();
        }

        let mut items = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for idx in 0..doc.scan.line_count() {
            let line = match doc.scan.line(idx) {
                Some(l) => l,
                None => continue,
            };
            if let Some(kv) = scan::parse_key_value(line) {
                if kv.key == "name" && kv.list_item {
                    if let Some((_, header)) = doc.scan.enclosing_block_key(idx) {
                        if header == "templates" && seen.insert(kv.value.clone()) {
                            items.push(CompletionItem {
                                label: kv.value,
                                kind: Some(CompletionItemKind::FUNCTION),
                                detail: Some("template".to_string()),
                                ..Default::default()
                            });
                        }
                    }
                }
            }
        }
        for definition in self.indices.templates.list_all(doc.uri.as_str()) {
            if seen.insert(definition.name.clone()) {
                items.push(CompletionItem {
                    label: definition.name,
                    kind: Some(CompletionItemKind::FUNCTION),
                    detail: Some("template".to_string()),
                    ..Default::default()
                });
            }
        }
        items
    }
}

/// Handles `{{inputs.parameters.x}}` / `{{outputs.parameters.x}}` uses and
/// parameter definition sites under `inputs:`/`outputs:`.
pub struct ParameterHandler {
    indices: Arc<Indices>,
}

impl ParameterHandler {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }

    fn scope_dir(scope: ParameterScope) -> &'static str {
        match scope {
            ParameterScope::Input => "inputs",
            ParameterScope::Output => "outputs",
        }
    }

    fn scope_label(scope: ParameterScope) -> &'static str {
        match scope {
            ParameterScope::Input => "Input parameter",
            ParameterScope::Output => "Output parameter",
        }
    }
}

impl Handler for ParameterHandler {
    fn name(&self) -> &'static str {
        "workflow-parameter"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line_idx = position.line as usize;
        let line = doc.scan.line(line_idx)?;

        // Expression use-site
        if scan::expression_at(line, token.start).is_some() {
            let caps = PARAM_TOKEN_RE.captures(&token.text)?;
            let scope = match caps.get(1)?.as_str() {
                "inputs" => ParameterScope::Input,
                _ => ParameterScope::Output,
            };
            // Without an enclosing template the reference has no scope to
            // resolve against: ambiguous, not guessed
            let template = doc.scan.info(line_idx)?.template.clone()?;
            return Some(DetectedReference::new(
                token.range(line),
                ReferenceDetails::Parameter {
                    scope,
                    name: caps.get(2)?.as_str().to_string(),
                    template: Some(template),
                    definition_site: false,
                    comment: None,
                },
            ));
        }

        // Definition site
        let kv = scan::parse_key_value(line)?;
        if kv.key != "name" || !kv.list_item || token.start < kv.value_start {
            return None;
        }
        let chain = doc.scan.block_chain(line_idx, 2);
        if chain.first().map(|(_, k)| k.as_str()) != Some("parameters") {
            return None;
        }
        let scope = match chain.get(1).map(|(_, k)| k.as_str()) {
            Some("inputs") => ParameterScope::Input,
            Some("outputs") => ParameterScope::Output,
            _ => return None,
        };
        let template = doc.scan.info(line_idx)?.template.clone()?;
        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::Parameter {
                scope,
                name: token.text.clone(),
                template: Some(template),
                definition_site: true,
                comment: doc.scan.leading_comment(line_idx),
            },
        ))
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let (scope, name, template, definition_site, comment) = match &reference.details {
            ReferenceDetails::Parameter {
                scope,
                name,
                template,
                definition_site,
                comment,
            } => (*scope, name, template, *definition_site, comment),
            _ => return ResolvedReference::empty(),
        };
        let template = match template {
            Some(t) => t,
            None => return ResolvedReference::empty(),
        };
        let dir = Self::scope_dir(scope);

        if definition_site {
            return ResolvedReference {
                hover_markdown: Some(format!(
                    "**{}** `{}` of template `{}`{}",
                    Self::scope_label(scope),
                    name,
                    template,
                    comment
                        .as_deref()
                        .map(|c| format!("\n\n{}", c))
                        .unwrap_or_default()
                )),
                exists: Some(true),
                ..Default::default()
            };
        }

        match find_parameter_definition(&doc.scan, template, dir, name) {
            Some(def_idx) => {
                let default = doc
                    .scan
                    .find_in_block(def_idx, "default")
                    .map(|(_, v)| format!("\n\ndefault: `{}`", v))
                    .unwrap_or_default();
                ResolvedReference {
                    hover_markdown: Some(format!(
                        "**{}** `{}` of template `{}`{}",
                        Self::scope_label(scope),
                        name,
                        template,
                        default
                    )),
                    definition_location: Some(line_location(doc, def_idx)),
                    exists: Some(true),
                    completions: None,
                }
            }
            None => {
                let scope_key = format!("{}/{}", template, dir);
                match self.indices.parameters.lookup(&scope_key, name) {
                    Some(definition) => ResolvedReference {
                        hover_markdown: Some(format!(
                            "**{}** `{}` of template `{}`",
                            Self::scope_label(scope),
                            name,
                            template
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
        }
    }

    fn complete(&self, doc: &DocumentContext, position: Position) -> Vec<CompletionItem> {
        let line_idx = position.line as usize;
        let line = match doc.scan.line(line_idx) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let byte = match utf16_col_to_byte(line, position.character) {
            Some(b) => b,
            None => return Vec::new(),
        };
        if !line[..byte].ends_with("inputs.parameters.") {
            return Vec::new();
        }
        let template = match doc.scan.info(line_idx).and_then(|i| i.template.clone()) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let mut items = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for idx in 0..doc.scan.line_count() {
            if let Some(def_line) = doc.scan.line(idx) {
                if let Some(kv) = scan::parse_key_value(def_line) {
                    if kv.key == "name"
                        && kv.list_item
                        && find_parameter_definition(&doc.scan, &template, "inputs", &kv.value)
                            == Some(idx)
                        && seen.insert(kv.value.clone())
                    {
                        items.push(CompletionItem {
                            label: kv.value,
                            kind: Some(CompletionItemKind::VARIABLE),
                            detail: Some(format!("input parameter of {}", template)),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        for definition in self
            .indices
            .parameters
            .list_all(&format!("{}/inputs", template))
        {
            if seen.insert(definition.name.clone()) {
                items.push(CompletionItem {
                    label: definition.name,
                    kind: Some(CompletionItemKind::VARIABLE),
                    detail: definition.detail,
                    ..Default::default()
                });
            }
        }
        items
    }
}

/// Handles `{{steps.s.outputs...}}` / `{{tasks.t.outputs...}}` expressions.
pub struct StepOutputHandler;

impl StepOutputHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StepOutputHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for StepOutputHandler {
    fn name(&self) -> &'static str {
        "step-output"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line = doc.scan.line(position.line as usize)?;
        scan::expression_at(line, token.start)?;

        let caps = STEP_OUTPUT_RE.captures(&token.text)?;
        let source = match caps.get(1)?.as_str() {
            "steps" => StepSource::Step,
            _ => StepSource::Task,
        };
        let output = match caps.get(3)?.as_str() {
            "parameters" => OutputKind::Parameter,
            "artifacts" => OutputKind::Artifact,
            _ => OutputKind::Result,
        };
        let name = caps.get(4).map(|m| m.as_str().to_string());
        // `result` takes no trailing name; parameters/artifacts require one
        match output {
            OutputKind::Result if name.is_some() => return None,
            OutputKind::Parameter | OutputKind::Artifact if name.is_none() => return None,
            _ => {}
        }

        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::StepOutput {
                source,
                step: caps.get(2)?.as_str().to_string(),
                output,
                name,
            },
        ))
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let (source, step, output, name) = match &reference.details {
            ReferenceDetails::StepOutput {
                source,
                step,
                output,
                name,
            } => (*source, step, *output, name),
            _ => return ResolvedReference::empty(),
        };

        let ref_line = reference.source_range.start.line as usize;
        let template = doc.scan.info(ref_line).and_then(|i| i.template.clone());
        let step_idx = match find_step_definition(&doc.scan, template.as_deref(), source, step) {
            Some(idx) => idx,
            None => {
                return ResolvedReference {
                    exists: Some(false),
                    ..Default::default()
                }
            }
        };

        let noun = match source {
            StepSource::Step => "Step",
            StepSource::Task => "Task",
        };
        let target_template = doc.scan.find_in_block(step_idx, "template").map(|(_, v)| v);

        match (output, name, &target_template) {
            (OutputKind::Result, _, _) => ResolvedReference {
                hover_markdown: Some(format!("**{} result** of `{}`", noun, step)),
                definition_location: Some(line_location(doc, step_idx)),
                exists: Some(true),
                completions: None,
            },
            (OutputKind::Parameter, Some(param), Some(target)) => {
                match find_parameter_definition(&doc.scan, target, "outputs", param) {
                    Some(def_idx) => ResolvedReference {
                        hover_markdown: Some(format!(
                            "**{} output parameter** `{}` from template `{}`",
                            noun, param, target
                        )),
                        definition_location: Some(line_location(doc, def_idx)),
                        exists: Some(true),
                        completions: None,
                    },
                    None => ResolvedReference {
                        exists: Some(false),
                        ..Default::default()
                    },
                }
            }
            (OutputKind::Artifact, Some(artifact), Some(target)) => {
                match find_artifact_definition(&doc.scan, target, artifact) {
                    Some(def_idx) => ResolvedReference {
                        hover_markdown: Some(format!(
                            "**{} output artifact** `{}` from template `{}`",
                            noun, artifact, target
                        )),
                        definition_location: Some(line_location(doc, def_idx)),
                        exists: Some(true),
                        completions: None,
                    },
                    None => ResolvedReference {
                        exists: Some(false),
                        ..Default::default()
                    },
                }
            }
            // Step resolved through a templateRef the open document cannot
            // verify: report the step location without claiming existence
            _ => ResolvedReference {
                hover_markdown: Some(format!("**{}** `{}`", noun, step)),
                definition_location: Some(line_location(doc, step_idx)),
                exists: None,
                completions: None,
            },
        }
    }
}

/// Handles `{{item}}` / `{{item.field}}` and the `withItems:`/`withParam:`
/// keys that feed them.
pub struct ItemHandler;

impl ItemHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ItemHandler {
    fn default() -> Self {
        Self::new()
    }
}

const ITEM_SOURCE_KEYS: &[&str] = &["withItems", "withParam", "withSequence"];
const ITEM_SOURCE_WINDOW: usize = 20;

fn find_item_source(scan: &ScanDocument, line_idx: usize) -> Option<(usize, String)> {
    let mut found = None;
    for key in ITEM_SOURCE_KEYS {
        if let Some((idx, value)) = scan.nearby_key_value(line_idx, key, ITEM_SOURCE_WINDOW) {
            let source = if value.is_empty() {
                key.to_string()
            } else {
                format!("{}: {}", key, value)
            };
            // Last occurrence across the window is authoritative
            if found.as_ref().map(|(i, _)| *i < idx).unwrap_or(true) {
                found = Some((idx, source));
            }
        }
    }
    found
}

impl Handler for ItemHandler {
    fn name(&self) -> &'static str {
        "item-variable"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line_idx = position.line as usize;
        let line = doc.scan.line(line_idx)?;

        // Cursor on the item-source key itself
        if let Some(kv) = scan::parse_key_value(line) {
            if ITEM_SOURCE_KEYS.contains(&kv.key.as_str())
                && token.start == kv.key_start
                && token.text == kv.key
            {
                return Some(DetectedReference::new(
                    token.range(line),
                    ReferenceDetails::ItemSource { source: kv.key },
                ));
            }
        }

        // `{{item}}` / `{{item.field}}` inside an expression, only when a
        // loop source corroborates it
        if scan::expression_at(line, token.start).is_none() {
            return None;
        }
        if token.text != "item" && !token.text.starts_with("item.") {
            return None;
        }
        find_item_source(&doc.scan, line_idx)?;

        let field = token
            .text
            .strip_prefix("item.")
            .map(|f| f.to_string());
        Some(DetectedReference::new(
            token.range(line),
            ReferenceDetails::Item { field },
        ))
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let ref_line = reference.source_range.start.line as usize;
        match &reference.details {
            ReferenceDetails::Item { field } => {
                let source = find_item_source(&doc.scan, ref_line);
                let name = match field {
                    Some(f) => format!("item.{}", f),
                    None => "item".to_string(),
                };
                match source {
                    Some((source_idx, source_text)) => ResolvedReference {
                        hover_markdown: Some(format!(
                            "**Item variable** `{{{{{}}}}}`\n\nIterates `{}`",
                            name, source_text
                        )),
                        definition_location: Some(line_location(doc, source_idx)),
                        exists: Some(true),
                        completions: None,
                    },
                    None => ResolvedReference {
                        exists: Some(false),
                        ..Default::default()
                    },
                }
            }
            ReferenceDetails::ItemSource { source } => {
                // Preview inline values or the first items of a literal block
                let preview = doc
                    .scan
                    .line(ref_line)
                    .and_then(scan::parse_key_value)
                    .map(|kv| kv.value)
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| {
                        doc.scan
                            .literal_block(ref_line)
                            .into_iter()
                            .filter_map(|i| doc.scan.line(i))
                            .map(|l| l.trim())
                            .filter(|l| !l.is_empty())
                            .take(3)
                            .collect::<Vec<_>>()
                            .join(", ")
                    });
                ResolvedReference {
                    hover_markdown: Some(format!("**Item source** `{}`\n\n{}", source, preview)),
                    exists: Some(true),
                    ..Default::default()
                }
            }
            _ => ResolvedReference::empty(),
        }
    }
}

/// Handles `{{workflow.*}}` variables and workflow-level parameter
/// definitions under `spec: arguments: parameters:`.
pub struct WorkflowVariableHandler {
    indices: Arc<Indices>,
}

impl WorkflowVariableHandler {
    pub fn new(indices: Arc<Indices>) -> Self {
        Self { indices }
    }

    fn find_workflow_parameter(scan: &ScanDocument, name: &str) -> Option<usize> {
        let mut found = None;
        for idx in 0..scan.line_count() {
            let line = match scan.line(idx) {
                Some(l) => l,
                None => continue,
            };
            let kv = match scan::parse_key_value(line) {
                Some(kv) => kv,
                None => continue,
            };
            if kv.key != "name" || !kv.list_item || kv.value != name {
                continue;
            }
            if is_workflow_arguments_chain(scan, idx) {
                found = Some(idx);
            }
        }
        found
    }
}

/// True for `- name:` entries under the workflow-level
/// `spec: arguments: parameters:` block — step-level `arguments:` blocks
/// sit under a step entry instead and do not qualify.
fn is_workflow_arguments_chain(scan: &ScanDocument, line_idx: usize) -> bool {
    let chain = scan.block_chain(line_idx, 3);
    chain.first().map(|(_, k)| k.as_str()) == Some("parameters")
        && chain.get(1).map(|(_, k)| k.as_str()) == Some("arguments")
        && matches!(
            chain.get(2).map(|(_, k)| k.as_str()),
            Some("spec") | Some("workflowSpec") | None
        )
}

impl Handler for WorkflowVariableHandler {
    fn name(&self) -> &'static str {
        "workflow-variable"
    }

    fn detect(&self, doc: &DocumentContext, position: Position) -> Option<DetectedReference> {
        let token = doc.scan.token_at(position)?;
        let line_idx = position.line as usize;
        let line = doc.scan.line(line_idx)?;

        // Expression use-site
        if scan::expression_at(line, token.start).is_some() {
            if token.text.starts_with("workflow.") {
                return Some(DetectedReference::new(
                    token.range(line),
                    ReferenceDetails::WorkflowVariable {
                        path: token.text.clone(),
                    },
                ));
            }
            return None;
        }

        // Definition site: `- name: x` under the workflow-level
        // `arguments: parameters:` block
        let kv = scan::parse_key_value(line)?;
        if kv.key != "name" || !kv.list_item || token.start < kv.value_start {
            return None;
        }
        if is_workflow_arguments_chain(&doc.scan, line_idx) {
            return Some(DetectedReference::new(
                token.range(line),
                ReferenceDetails::WorkflowVariable {
                    path: format!("workflow.parameters.{}", token.text),
                },
            ));
        }
        None
    }

    fn resolve(&self, doc: &DocumentContext, reference: &DetectedReference) -> ResolvedReference {
        let path = match &reference.details {
            ReferenceDetails::WorkflowVariable { path } => path,
            _ => return ResolvedReference::empty(),
        };

        if let Some(name) = path.strip_prefix("workflow.parameters.") {
            return match Self::find_workflow_parameter(&doc.scan, name) {
                Some(def_idx) => ResolvedReference {
                    hover_markdown: Some(format!("**Workflow parameter** `{}`", name)),
                    definition_location: Some(line_location(doc, def_idx)),
                    exists: Some(true),
                    completions: None,
                },
                None => match self.indices.parameters.lookup("workflow", name) {
                    Some(definition) => ResolvedReference {
                        hover_markdown: Some(format!("**Workflow parameter** `{}`", name)),
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
                },
            };
        }

        match catalog::workflow_variable_doc(path) {
            Some(docstring) => ResolvedReference {
                hover_markdown: Some(format!("**Workflow variable** `{}`\n\n{}", path, docstring)),
                exists: Some(true),
                ..Default::default()
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
        if !line[..byte].ends_with("workflow.") {
            return Vec::new();
        }

        let mut items: Vec<CompletionItem> = catalog::WORKFLOW_VARIABLES
            .iter()
            .map(|(path, doc)| CompletionItem {
                label: path.trim_start_matches("workflow.").to_string(),
                kind: Some(CompletionItemKind::VARIABLE),
                detail: Some(doc.to_string()),
                ..Default::default()
            })
            .collect();
        items.push(CompletionItem {
            label: "parameters".to_string(),
            kind: Some(CompletionItemKind::MODULE),
            detail: Some("Workflow-level parameters".to_string()),
            ..Default::default()
        });
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ReferenceKind;
    use tower_lsp::lsp_types::Url;

    const WORKFLOW: &str = "\
apiVersion: argoproj.io/v1alpha1
kind: Workflow
metadata:
  name: demo
spec:
  arguments:
    parameters:
      - name: env
        value: staging
  templates:
    # entrypoint of the workflow
    - name: main
      steps:
        - - name: greet
            template: whalesay
            arguments:
              parameters:
                - name: msg
                  value: \"{{workflow.parameters.env}}\"
        - - name: loop-step
            template: whalesay
            withItems:
              - alpha
              - beta
            arguments:
              parameters:
                - name: msg
                  value: \"{{item}}\"
        - - name: after
            template: whalesay
            arguments:
              parameters:
                - name: msg
                  value: \"{{steps.greet.outputs.result}}\"
    - name: whalesay
      inputs:
        parameters:
          - name: msg
            default: hello
      outputs:
        parameters:
          - name: done
            valueFrom:
              path: /tmp/done
      container:
        image: docker/whalesay
        args: [\"{{inputs.parameters.msg}}\"]
";

    fn doc() -> DocumentContext {
        DocumentContext::new(Url::parse("file:///wf.yaml").unwrap(), WORKFLOW)
    }

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_detect_template_use_site() {
        let handler = TemplateHandler::new(Indices::new());
        let document = doc();
        // `template: whalesay` on line 14
        let detected = handler.detect(&document, pos(14, 25)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::TemplateDirect);
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::Template { name, definition_site: false, .. } if name == "whalesay"
        );

        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert_eq!(
            resolved.definition_location.unwrap().range.start.line,
            34
        );
    }

    #[test]
    fn test_detect_template_definition_site_with_comment() {
        let handler = TemplateHandler::new(Indices::new());
        let document = doc();
        // `- name: main` on line 11
        let detected = handler.detect(&document, pos(11, 14)).unwrap();
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::Template { name, definition_site: true, comment: Some(c) }
                if name == "main" && c.contains("entrypoint")
        );
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
    }

    #[test]
    fn test_unknown_template_reports_missing() {
        let handler = TemplateHandler::new(Indices::new());
        let text = "\
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: a
            template: nonexistent
";
        let document = DocumentContext::new(Url::parse("file:///x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(6, 25)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
        assert!(resolved.hover_markdown.is_none());
    }

    #[test]
    fn test_detect_input_parameter_use() {
        let handler = ParameterHandler::new(Indices::new());
        let document = doc();
        // `{{inputs.parameters.msg}}` on line 46
        let detected = handler.detect(&document, pos(46, 20)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::InputParameter);
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::Parameter { name, template: Some(t), .. }
                if name == "msg" && t == "whalesay"
        );

        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert!(resolved.hover_markdown.unwrap().contains("default: `hello`"));
        assert_eq!(resolved.definition_location.unwrap().range.start.line, 37);
    }

    #[test]
    fn test_detect_parameter_definition_site() {
        let handler = ParameterHandler::new(Indices::new());
        let document = doc();
        // `- name: msg` under whalesay inputs on line 37
        let detected = handler.detect(&document, pos(37, 19)).unwrap();
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::Parameter { definition_site: true, .. }
        );
    }

    #[test]
    fn test_parameter_outside_template_is_ambiguous() {
        let handler = ParameterHandler::new(Indices::new());
        let text = "kind: Workflow\nspec:\n  x: \"{{inputs.parameters.msg}}\"\n";
        let document = DocumentContext::new(Url::parse("file:///x.yaml").unwrap(), text);
        assert!(handler.detect(&document, pos(2, 12)).is_none());
    }

    #[test]
    fn test_detect_step_output_result() {
        let handler = StepOutputHandler::new();
        let document = doc();
        // `{{steps.greet.outputs.result}}` on line 33
        let detected = handler.detect(&document, pos(33, 30)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::StepOutputResult);

        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        // Jumps to the `- - name: greet` step entry
        assert_eq!(resolved.definition_location.unwrap().range.start.line, 13);
    }

    #[test]
    fn test_step_output_unknown_step() {
        let handler = StepOutputHandler::new();
        let text = "\
kind: Workflow
spec:
  templates:
    - name: main
      steps:
        - - name: a
            template: t
            arguments:
              parameters:
                - name: x
                  value: \"{{steps.missing.outputs.result}}\"
";
        let document = DocumentContext::new(Url::parse("file:///x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(10, 30)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
    }

    #[test]
    fn test_detect_item_requires_loop_source() {
        let handler = ItemHandler::new();
        let document = doc();
        // `{{item}}` on line 27, inside the loop-step block
        let detected = handler.detect(&document, pos(27, 29)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::ItemVariable);
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        assert!(resolved.hover_markdown.unwrap().contains("withItems"));

        // An `{{item}}` with no withItems/withParam anywhere near is ambiguous
        let text = "kind: Workflow\nspec:\n  templates:\n    - name: t\n      container:\n        args: [\"{{item}}\"]\n";
        let lonely = DocumentContext::new(Url::parse("file:///x.yaml").unwrap(), text);
        assert!(handler.detect(&lonely, pos(5, 18)).is_none());
    }

    #[test]
    fn test_detect_item_source_key() {
        let handler = ItemHandler::new();
        let document = doc();
        // Cursor on `withItems` key, line 21
        let detected = handler.detect(&document, pos(21, 15)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::ItemSource);
        let resolved = handler.resolve(&document, &detected);
        assert!(resolved.hover_markdown.unwrap().contains("alpha"));
    }

    #[test]
    fn test_workflow_variable_known_and_parameter() {
        let handler = WorkflowVariableHandler::new(Indices::new());
        let document = doc();
        // `{{workflow.parameters.env}}` on line 18
        let detected = handler.detect(&document, pos(18, 30)).unwrap();
        assert_eq!(detected.kind, ReferenceKind::WorkflowVariable);
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(true));
        // Jumps to the arguments parameter definition
        assert_eq!(resolved.definition_location.unwrap().range.start.line, 7);
    }

    #[test]
    fn test_workflow_variable_unknown_path() {
        let handler = WorkflowVariableHandler::new(Indices::new());
        let text = "kind: Workflow\nspec:\n  templates:\n    - name: t\n      container:\n        args: [\"{{workflow.bogus}}\"]\n";
        let document = DocumentContext::new(Url::parse("file:///x.yaml").unwrap(), text);
        let detected = handler.detect(&document, pos(5, 20)).unwrap();
        let resolved = handler.resolve(&document, &detected);
        assert_eq!(resolved.exists, Some(false));
    }

    #[test]
    fn test_workflow_parameter_definition_site_identity() {
        let handler = WorkflowVariableHandler::new(Indices::new());
        let document = doc();
        // `- name: env` under arguments parameters, line 7
        let detected = handler.detect(&document, pos(7, 15)).unwrap();
        assert_matches::assert_matches!(
            &detected.details,
            ReferenceDetails::WorkflowVariable { path } if path == "workflow.parameters.env"
        );
    }
}
