//! yaml-gotmpl-lsp: LSP server library for YAML documents carrying embedded
//! double-brace template expressions — Argo Workflows manifests and Helm
//! chart templates.
//!
//! The embedded expressions make the text invalid for a strict YAML parser,
//! so every semantic feature is built on line-oriented, context-aware
//! scanning:
//! - a guarded, priority-ordered handler registry resolves the construct
//!   under a cursor (hover, definition, completion, references);
//! - a rendering-correlation algorithm maps positions in externally
//!   rendered output back to the template source.
//!
//! # Example
//!
//! ```
//! use tower_lsp::lsp_types::{Position, Url};
//! use yaml_gotmpl_lsp::index::Indices;
//! use yaml_gotmpl_lsp::registry::{DocumentContext, Registry};
//!
//! let registry = Registry::new(Indices::new());
//! let doc = DocumentContext::new(
//!     Url::parse("file:///wf.yaml").unwrap(),
//!     "kind: Workflow\nspec:\n  templates:\n    - name: main\n",
//! );
//! let resolved = registry.detect_and_resolve(&doc, Position { line: 3, character: 13 });
//! assert_eq!(resolved.exists, Some(true));
//! ```

pub mod catalog;
pub mod diagnostics;
pub mod document;
pub mod index;
pub mod refs;
pub mod registry;
pub mod render;
pub mod scan;

mod backend;

pub use backend::Backend;
