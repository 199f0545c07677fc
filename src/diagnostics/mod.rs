//! Diagnostics: syntax errors and dangling references

mod collector;
mod references;
mod syntax;

pub use collector::{DiagnosticCode, DiagnosticCollector};
pub use references::collect_reference_diagnostics;
pub use syntax::{collect_syntax_diagnostics, preprocess_template};
