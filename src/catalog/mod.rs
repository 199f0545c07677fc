//! Static catalogs of template builtins and well-known variables
//!
//! Read-only, version-pinned tables: Go-template control keywords, the
//! builtin/Sprig function surface charts rely on, `.Chart`/`.Release`/
//! `.Capabilities` fields, and the well-known `workflow.*` variables of the
//! workflow manifest dialect. The core consults these tables; it never
//! derives them at runtime.

/// Go-template control keywords with hover documentation
pub const GO_TEMPLATE_KEYWORDS: &[(&str, &str)] = &[
    ("if", "Begins a conditional block, ended by `end`."),
    ("else", "Alternative branch of an `if` or `range` block."),
    ("range", "Iterates over a list or map, ended by `end`."),
    ("with", "Rebinds the dot to its argument when non-empty, ended by `end`."),
    ("define", "Defines a named template, ended by `end`."),
    ("block", "Defines and immediately executes a named template."),
    ("end", "Closes an `if`, `range`, `with`, `define`, or `block`."),
    ("template", "Executes a named template with the given data."),
];

/// A builtin function's signature and one-line documentation
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub signature: &'static str,
    pub doc: &'static str,
}

/// Builtin and Sprig functions available inside chart template expressions
pub const BUILTIN_FUNCTIONS: &[BuiltinFunction] = &[
    BuiltinFunction {
        name: "include",
        signature: "include NAME CONTEXT",
        doc: "Executes a named template and returns its output as a string.",
    },
    BuiltinFunction {
        name: "tpl",
        signature: "tpl TEMPLATE CONTEXT",
        doc: "Evaluates a string as a template against the given context.",
    },
    BuiltinFunction {
        name: "required",
        signature: "required MESSAGE VALUE",
        doc: "Fails rendering with MESSAGE when VALUE is empty.",
    },
    BuiltinFunction {
        name: "lookup",
        signature: "lookup APIVERSION KIND NAMESPACE NAME",
        doc: "Looks up a live cluster resource during rendering.",
    },
    BuiltinFunction {
        name: "toYaml",
        signature: "toYaml VALUE",
        doc: "Serializes a value to YAML.",
    },
    BuiltinFunction {
        name: "fromYaml",
        signature: "fromYaml STRING",
        doc: "Parses a YAML string into a dict.",
    },
    BuiltinFunction {
        name: "toJson",
        signature: "toJson VALUE",
        doc: "Serializes a value to JSON.",
    },
    BuiltinFunction {
        name: "default",
        signature: "default DEFAULT VALUE",
        doc: "Returns DEFAULT when VALUE is empty.",
    },
    BuiltinFunction {
        name: "coalesce",
        signature: "coalesce VALUES...",
        doc: "Returns the first non-empty argument.",
    },
    BuiltinFunction {
        name: "ternary",
        signature: "ternary IFTRUE IFFALSE CONDITION",
        doc: "Selects between two values by a boolean.",
    },
    BuiltinFunction {
        name: "quote",
        signature: "quote VALUE",
        doc: "Wraps a value in double quotes.",
    },
    BuiltinFunction {
        name: "squote",
        signature: "squote VALUE",
        doc: "Wraps a value in single quotes.",
    },
    BuiltinFunction {
        name: "indent",
        signature: "indent COUNT STRING",
        doc: "Indents every line of STRING by COUNT spaces.",
    },
    BuiltinFunction {
        name: "nindent",
        signature: "nindent COUNT STRING",
        doc: "Like indent, but prepends a newline first.",
    },
    BuiltinFunction {
        name: "trunc",
        signature: "trunc COUNT STRING",
        doc: "Truncates a string to COUNT characters.",
    },
    BuiltinFunction {
        name: "trimSuffix",
        signature: "trimSuffix SUFFIX STRING",
        doc: "Removes SUFFIX from the end of STRING.",
    },
    BuiltinFunction {
        name: "trimPrefix",
        signature: "trimPrefix PREFIX STRING",
        doc: "Removes PREFIX from the start of STRING.",
    },
    BuiltinFunction {
        name: "replace",
        signature: "replace OLD NEW STRING",
        doc: "Replaces every occurrence of OLD with NEW.",
    },
    BuiltinFunction {
        name: "upper",
        signature: "upper STRING",
        doc: "Uppercases a string.",
    },
    BuiltinFunction {
        name: "lower",
        signature: "lower STRING",
        doc: "Lowercases a string.",
    },
    BuiltinFunction {
        name: "printf",
        signature: "printf FORMAT ARGS...",
        doc: "Formats a string in the manner of fmt.Sprintf.",
    },
    BuiltinFunction {
        name: "hasKey",
        signature: "hasKey DICT KEY",
        doc: "True when DICT contains KEY.",
    },
    BuiltinFunction {
        name: "dig",
        signature: "dig KEYS... DEFAULT DICT",
        doc: "Traverses nested dicts, returning DEFAULT when a key is missing.",
    },
    BuiltinFunction {
        name: "b64enc",
        signature: "b64enc STRING",
        doc: "Base64-encodes a string.",
    },
    BuiltinFunction {
        name: "b64dec",
        signature: "b64dec STRING",
        doc: "Base64-decodes a string.",
    },
    BuiltinFunction {
        name: "sha256sum",
        signature: "sha256sum STRING",
        doc: "Hex-encoded SHA-256 of a string.",
    },
];

/// Fields of the builtin `.Chart` object
pub const CHART_FIELDS: &[(&str, &str)] = &[
    ("Name", "The chart name from Chart.yaml."),
    ("Version", "The chart version from Chart.yaml."),
    ("AppVersion", "The application version from Chart.yaml."),
    ("Description", "The chart description from Chart.yaml."),
    ("Type", "The chart type (application or library)."),
];

/// Fields of the builtin `.Release` object
pub const RELEASE_FIELDS: &[(&str, &str)] = &[
    ("Name", "The release name."),
    ("Namespace", "The namespace the release is installed into."),
    ("Revision", "The revision number of this release."),
    ("IsUpgrade", "True when the current operation is an upgrade or rollback."),
    ("IsInstall", "True when the current operation is an install."),
    ("Service", "The service rendering the template."),
];

/// Fields of the builtin `.Capabilities` object
pub const CAPABILITIES_FIELDS: &[(&str, &str)] = &[
    ("KubeVersion", "The Kubernetes version of the target cluster."),
    ("APIVersions", "The API versions supported by the target cluster."),
    ("HelmVersion", "The version of the renderer."),
];

/// Well-known `workflow.*` variables of the workflow manifest dialect
pub const WORKFLOW_VARIABLES: &[(&str, &str)] = &[
    ("workflow.name", "The workflow's object name."),
    ("workflow.namespace", "The workflow's namespace."),
    ("workflow.uid", "The workflow's cluster UID."),
    ("workflow.serviceAccountName", "The service account the workflow runs as."),
    ("workflow.creationTimestamp", "When the workflow object was created."),
    ("workflow.priority", "The workflow's scheduling priority."),
    ("workflow.duration", "Elapsed wall-clock time of the workflow."),
    ("workflow.scheduledTime", "The cron-scheduled time, for cron workflows."),
    ("workflow.status", "The workflow's phase, available in exit handlers."),
    ("workflow.failures", "Failed node summaries, available in exit handlers."),
];

/// Prefixes of `workflow.*` variables whose final segment is user-defined
pub const WORKFLOW_VARIABLE_PREFIXES: &[&str] =
    &["workflow.parameters.", "workflow.outputs.parameters.", "workflow.labels.", "workflow.annotations."];

/// Check whether a word is a Go-template control keyword.
pub fn is_keyword(word: &str) -> bool {
    GO_TEMPLATE_KEYWORDS.iter().any(|(k, _)| *k == word)
}

/// Documentation for a control keyword.
pub fn keyword_doc(word: &str) -> Option<&'static str> {
    GO_TEMPLATE_KEYWORDS
        .iter()
        .find(|(k, _)| *k == word)
        .map(|(_, doc)| *doc)
}

/// Look up a builtin function by name.
pub fn builtin_function(name: &str) -> Option<&'static BuiltinFunction> {
    BUILTIN_FUNCTIONS.iter().find(|f| f.name == name)
}

/// Documentation for a `.Chart`/`.Release`/`.Capabilities` field.
pub fn builtin_field_doc(fields: &'static [(&'static str, &'static str)], field: &str) -> Option<&'static str> {
    fields.iter().find(|(f, _)| *f == field).map(|(_, doc)| *doc)
}

/// Documentation for a well-known `workflow.*` variable. Prefixed variables
/// (`workflow.parameters.x`) match by prefix.
pub fn workflow_variable_doc(path: &str) -> Option<&'static str> {
    if let Some((_, doc)) = WORKFLOW_VARIABLES.iter().find(|(v, _)| *v == path) {
        return Some(doc);
    }
    if WORKFLOW_VARIABLE_PREFIXES
        .iter()
        .any(|p| path.starts_with(p) && path.len() > p.len())
    {
        return Some("A user-defined workflow-scoped value.");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_keyword() {
        assert!(is_keyword("range"));
        assert!(is_keyword("end"));
        assert!(!is_keyword("include"));
        assert!(!is_keyword("values"));
    }

    #[test]
    fn test_builtin_function() {
        let f = builtin_function("nindent").unwrap();
        assert_eq!(f.signature, "nindent COUNT STRING");
        assert!(builtin_function("no_such_fn").is_none());
    }

    #[test]
    fn test_builtin_field_doc() {
        assert!(builtin_field_doc(CHART_FIELDS, "Name").is_some());
        assert!(builtin_field_doc(RELEASE_FIELDS, "Namespace").is_some());
        assert!(builtin_field_doc(CAPABILITIES_FIELDS, "Nope").is_none());
    }

    #[test]
    fn test_workflow_variable_doc() {
        assert!(workflow_variable_doc("workflow.name").is_some());
        assert!(workflow_variable_doc("workflow.parameters.env").is_some());
        assert!(workflow_variable_doc("workflow.parameters.").is_none());
        assert!(workflow_variable_doc("workflow.bogus").is_none());
    }
}
