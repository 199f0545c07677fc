//! Typed references and resolution results
//!
//! A [`DetectedReference`] is a located, typed mention of a named entity.
//! The kind tag is a closed union; the payload variant is determined by the
//! kind and the two are kept consistent by deriving the kind from the
//! payload at construction. Resolvers must refuse payloads that do not match
//! their own kind by returning the empty resolution.

use tower_lsp::lsp_types::{CompletionItem, Location, Range};

/// Closed union of reference kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    TemplateDirect,
    TemplateRef,
    InputParameter,
    OutputParameter,
    StepOutputParameter,
    TaskOutputParameter,
    StepOutputArtifact,
    TaskOutputArtifact,
    StepOutputResult,
    TaskOutputResult,
    WorkflowVariable,
    ItemVariable,
    ItemSource,
    ConfigMapKeyRef,
    ConfigMapRef,
    ConfigMapVolume,
    SecretKeyRef,
    SecretRef,
    SecretVolume,
    HelmValuesPath,
    HelmTemplateName,
    HelmBuiltinFunction,
    HelmChartVariable,
    HelmReleaseVariable,
    HelmCapabilitiesVariable,
    GoTemplateKeyword,
}

impl ReferenceKind {
    /// Human-readable label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TemplateDirect | Self::TemplateRef => "template",
            Self::InputParameter => "input parameter",
            Self::OutputParameter => "output parameter",
            Self::StepOutputParameter | Self::TaskOutputParameter => "output parameter",
            Self::StepOutputArtifact | Self::TaskOutputArtifact => "output artifact",
            Self::StepOutputResult | Self::TaskOutputResult => "output result",
            Self::WorkflowVariable => "workflow variable",
            Self::ItemVariable => "item variable",
            Self::ItemSource => "item source",
            Self::ConfigMapKeyRef | Self::ConfigMapRef | Self::ConfigMapVolume => "ConfigMap",
            Self::SecretKeyRef | Self::SecretRef | Self::SecretVolume => "Secret",
            Self::HelmValuesPath => "values path",
            Self::HelmTemplateName => "named template",
            Self::HelmBuiltinFunction => "function",
            Self::HelmChartVariable => "chart variable",
            Self::HelmReleaseVariable => "release variable",
            Self::HelmCapabilitiesVariable => "capabilities variable",
            Self::GoTemplateKeyword => "keyword",
        }
    }
}

/// Which parameter list a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterScope {
    Input,
    Output,
}

/// Step list vs DAG task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepSource {
    Step,
    Task,
}

/// What a step/task output reference names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Parameter,
    Artifact,
    Result,
}

/// ConfigMap vs Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KubeTarget {
    ConfigMap,
    Secret,
}

/// How a ConfigMap/Secret is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KubeAccess {
    KeyRef,
    EnvFrom,
    Volume,
}

/// Built-in template variable roots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinRoot {
    Chart,
    Release,
    Capabilities,
}

/// Kind-specific payload of a detected reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceDetails {
    /// `template: name` use-site or `- name:` definition under `templates:`
    Template {
        name: String,
        definition_site: bool,
        /// Leading comment at a definition site
        comment: Option<String>,
    },
    /// `templateRef:` pair naming a template in another resource
    TemplateRef { resource: String, template: String },
    /// Input/output parameter definition or `{{inputs.parameters.x}}` use
    Parameter {
        scope: ParameterScope,
        name: String,
        /// Enclosing workflow template name, when known
        template: Option<String>,
        definition_site: bool,
        comment: Option<String>,
    },
    /// `{{steps.s.outputs.parameters.p}}` and friends
    StepOutput {
        source: StepSource,
        step: String,
        output: OutputKind,
        /// `None` for `outputs.result`
        name: Option<String>,
    },
    /// `{{workflow.name}}`, `{{workflow.parameters.x}}`, ...
    WorkflowVariable { path: String },
    /// `{{item}}` or `{{item.field}}`
    Item { field: Option<String> },
    /// The `withItems:`/`withParam:` key feeding `{{item}}`
    ItemSource { source: String },
    /// ConfigMap/Secret name or key reference
    KubeRef {
        target: KubeTarget,
        access: KubeAccess,
        name: String,
        /// Set when the reference is to a key inside the object
        key: Option<String>,
    },
    /// `.Values.image.repository`
    ValuesPath { path: Vec<String> },
    /// `include "chart.fullname"` use or `define "chart.fullname"` definition
    NamedTemplate { name: String, definition_site: bool },
    /// A builtin function name inside an expression
    BuiltinFunction { name: String },
    /// `.Chart.Name`, `.Release.Namespace`, `.Capabilities.KubeVersion`, ...
    BuiltinVariable {
        root: BuiltinRoot,
        field: Option<String>,
    },
    /// A Go-template control keyword
    Keyword { word: String },
}

impl ReferenceDetails {
    /// The kind this payload belongs to. `DetectedReference` derives its tag
    /// from here, so payload and tag cannot disagree.
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Self::Template { .. } => ReferenceKind::TemplateDirect,
            Self::TemplateRef { .. } => ReferenceKind::TemplateRef,
            Self::Parameter {
                scope: ParameterScope::Input,
                ..
            } => ReferenceKind::InputParameter,
            Self::Parameter {
                scope: ParameterScope::Output,
                ..
            } => ReferenceKind::OutputParameter,
            Self::StepOutput { source, output, .. } => match (source, output) {
                (StepSource::Step, OutputKind::Parameter) => ReferenceKind::StepOutputParameter,
                (StepSource::Step, OutputKind::Artifact) => ReferenceKind::StepOutputArtifact,
                (StepSource::Step, OutputKind::Result) => ReferenceKind::StepOutputResult,
                (StepSource::Task, OutputKind::Parameter) => ReferenceKind::TaskOutputParameter,
                (StepSource::Task, OutputKind::Artifact) => ReferenceKind::TaskOutputArtifact,
                (StepSource::Task, OutputKind::Result) => ReferenceKind::TaskOutputResult,
            },
            Self::WorkflowVariable { .. } => ReferenceKind::WorkflowVariable,
            Self::Item { .. } => ReferenceKind::ItemVariable,
            Self::ItemSource { .. } => ReferenceKind::ItemSource,
            Self::KubeRef { target, access, .. } => match (target, access) {
                (KubeTarget::ConfigMap, KubeAccess::KeyRef) => ReferenceKind::ConfigMapKeyRef,
                (KubeTarget::ConfigMap, KubeAccess::EnvFrom) => ReferenceKind::ConfigMapRef,
                (KubeTarget::ConfigMap, KubeAccess::Volume) => ReferenceKind::ConfigMapVolume,
                (KubeTarget::Secret, KubeAccess::KeyRef) => ReferenceKind::SecretKeyRef,
                (KubeTarget::Secret, KubeAccess::EnvFrom) => ReferenceKind::SecretRef,
                (KubeTarget::Secret, KubeAccess::Volume) => ReferenceKind::SecretVolume,
            },
            Self::ValuesPath { .. } => ReferenceKind::HelmValuesPath,
            Self::NamedTemplate { .. } => ReferenceKind::HelmTemplateName,
            Self::BuiltinFunction { .. } => ReferenceKind::HelmBuiltinFunction,
            Self::BuiltinVariable { root, .. } => match root {
                BuiltinRoot::Chart => ReferenceKind::HelmChartVariable,
                BuiltinRoot::Release => ReferenceKind::HelmReleaseVariable,
                BuiltinRoot::Capabilities => ReferenceKind::HelmCapabilitiesVariable,
            },
            Self::Keyword { .. } => ReferenceKind::GoTemplateKeyword,
        }
    }

    /// The primary name a diagnostic would print for this payload.
    pub fn display_name(&self) -> String {
        match self {
            Self::Template { name, .. } => name.clone(),
            Self::TemplateRef { resource, template } => format!("{}/{}", resource, template),
            Self::Parameter { name, .. } => name.clone(),
            Self::StepOutput { step, name, .. } => match name {
                Some(n) => format!("{}.{}", step, n),
                None => step.clone(),
            },
            Self::WorkflowVariable { path } => path.clone(),
            Self::Item { field } => match field {
                Some(f) => format!("item.{}", f),
                None => "item".to_string(),
            },
            Self::ItemSource { source } => source.clone(),
            Self::KubeRef { name, key, .. } => match key {
                Some(k) => format!("{}/{}", name, k),
                None => name.clone(),
            },
            Self::ValuesPath { path } => path.join("."),
            Self::NamedTemplate { name, .. } => name.clone(),
            Self::BuiltinFunction { name } => name.clone(),
            Self::BuiltinVariable { root, field } => {
                let root = match root {
                    BuiltinRoot::Chart => "Chart",
                    BuiltinRoot::Release => "Release",
                    BuiltinRoot::Capabilities => "Capabilities",
                };
                match field {
                    Some(f) => format!(".{}.{}", root, f),
                    None => format!(".{}", root),
                }
            }
            Self::Keyword { word } => word.clone(),
        }
    }
}

/// A located, typed mention of a named entity in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedReference {
    pub kind: ReferenceKind,
    pub source_range: Range,
    pub details: ReferenceDetails,
}

impl DetectedReference {
    /// Build a reference; the kind tag comes from the payload.
    pub fn new(source_range: Range, details: ReferenceDetails) -> Self {
        Self {
            kind: details.kind(),
            source_range,
            details,
        }
    }

    /// The logical identity used by find-all-references. Two references with
    /// equal identities name the same entity regardless of which side of the
    /// definition/use divide either sits on. `None` for kinds that have no
    /// cross-site identity (keywords, builtins).
    pub fn identity(&self) -> Option<ReferenceIdentity> {
        match &self.details {
            ReferenceDetails::Template { name, .. } => Some(ReferenceIdentity::Template {
                name: name.clone(),
            }),
            ReferenceDetails::TemplateRef { template, .. } => Some(ReferenceIdentity::Template {
                name: template.clone(),
            }),
            ReferenceDetails::Parameter {
                scope,
                name,
                template,
                ..
            } => Some(ReferenceIdentity::Parameter {
                scope: *scope,
                template: template.clone(),
                name: name.clone(),
            }),
            ReferenceDetails::WorkflowVariable { path } => {
                Some(ReferenceIdentity::WorkflowVariable { path: path.clone() })
            }
            ReferenceDetails::KubeRef {
                target, name, key, ..
            } => Some(ReferenceIdentity::KubeObject {
                target: *target,
                name: name.clone(),
                key: key.clone(),
            }),
            ReferenceDetails::ValuesPath { path } => Some(ReferenceIdentity::ValuesPath {
                path: path.clone(),
            }),
            ReferenceDetails::NamedTemplate { name, .. } => {
                Some(ReferenceIdentity::NamedTemplate { name: name.clone() })
            }
            _ => None,
        }
    }
}

/// Logical identity of a referenced entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceIdentity {
    Template { name: String },
    NamedTemplate { name: String },
    WorkflowVariable { path: String },
    Parameter {
        scope: ParameterScope,
        template: Option<String>,
        name: String,
    },
    KubeObject {
        target: KubeTarget,
        name: String,
        key: Option<String>,
    },
    ValuesPath { path: Vec<String> },
}

/// Outcome of resolving a detected reference. All fields are independently
/// optional; "no result" is a first-class, non-error value.
#[derive(Debug, Clone, Default)]
pub struct ResolvedReference {
    pub hover_markdown: Option<String>,
    pub definition_location: Option<Location>,
    pub exists: Option<bool>,
    pub completions: Option<Vec<CompletionItem>>,
}

impl ResolvedReference {
    /// The canonical "no result" value.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hover_markdown.is_none()
            && self.definition_location.is_none()
            && self.exists.is_none()
            && self.completions.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Position;

    fn range() -> Range {
        Range {
            start: Position {
                line: 0,
                character: 0,
            },
            end: Position {
                line: 0,
                character: 4,
            },
        }
    }

    #[test]
    fn test_kind_derived_from_payload() {
        let reference = DetectedReference::new(
            range(),
            ReferenceDetails::KubeRef {
                target: KubeTarget::ConfigMap,
                access: KubeAccess::KeyRef,
                name: "app-config".to_string(),
                key: None,
            },
        );
        assert_eq!(reference.kind, ReferenceKind::ConfigMapKeyRef);
        assert_eq!(reference.kind, reference.details.kind());
    }

    #[test]
    fn test_step_output_kinds() {
        let details = ReferenceDetails::StepOutput {
            source: StepSource::Task,
            step: "build".to_string(),
            output: OutputKind::Result,
            name: None,
        };
        assert_eq!(details.kind(), ReferenceKind::TaskOutputResult);
    }

    #[test]
    fn test_identity_symmetric_across_sites() {
        let definition = DetectedReference::new(
            range(),
            ReferenceDetails::Template {
                name: "main".to_string(),
                definition_site: true,
                comment: None,
            },
        );
        let use_site = DetectedReference::new(
            range(),
            ReferenceDetails::Template {
                name: "main".to_string(),
                definition_site: false,
                comment: None,
            },
        );
        assert_eq!(definition.identity(), use_site.identity());
    }

    #[test]
    fn test_template_ref_shares_template_identity() {
        let direct = DetectedReference::new(
            range(),
            ReferenceDetails::Template {
                name: "deploy".to_string(),
                definition_site: false,
                comment: None,
            },
        );
        let via_ref = DetectedReference::new(
            range(),
            ReferenceDetails::TemplateRef {
                resource: "shared".to_string(),
                template: "deploy".to_string(),
            },
        );
        assert_eq!(direct.identity(), via_ref.identity());
    }

    #[test]
    fn test_keyword_has_no_identity() {
        let keyword = DetectedReference::new(
            range(),
            ReferenceDetails::Keyword {
                word: "range".to_string(),
            },
        );
        assert!(keyword.identity().is_none());
    }

    #[test]
    fn test_empty_resolution() {
        assert!(ResolvedReference::empty().is_empty());
        let resolved = ResolvedReference {
            exists: Some(false),
            ..Default::default()
        };
        assert!(!resolved.is_empty());
    }
}
