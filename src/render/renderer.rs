//! External template renderer boundary
//!
//! The one place in the crate where real faults can happen. The renderer is
//! an external process invoked with a hard timeout; every failure mode is
//! caught here and converted into [`RenderFailure`], which callers degrade
//! into "correlation unavailable" — hover and definition requests never see
//! an error from this boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

/// Why a render produced no output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    /// The renderer did not finish within the configured timeout
    Timeout,
    /// The renderer binary could not be started
    Unavailable(String),
    /// The renderer exited nonzero
    Failed { status: Option<i32>, stderr: String },
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "renderer timed out"),
            Self::Unavailable(reason) => write!(f, "renderer unavailable: {}", reason),
            Self::Failed { status, stderr } => write!(
                f,
                "renderer failed (status {:?}): {}",
                status,
                stderr.trim()
            ),
        }
    }
}

/// One rendered template document, attributed to its source path
#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    /// Chart-relative path from the `# Source:` marker
    pub source_path: String,
    pub text: String,
}

/// The renderer's full output
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub raw: String,
    pub templates: Vec<RenderedTemplate>,
}

impl RenderOutput {
    /// Split raw renderer output into per-template documents on `---`
    /// separators with `# Source:` attribution comments.
    pub fn parse(raw: String) -> Self {
        let mut templates = Vec::new();
        let mut current_path: Option<String> = None;
        let mut current_text = String::new();

        let mut flush = |path: &mut Option<String>, text: &mut String, out: &mut Vec<RenderedTemplate>| {
            if let Some(p) = path.take() {
                let body = text.trim_start_matches('\n').trim_end().to_string();
                if !body.is_empty() {
                    out.push(RenderedTemplate {
                        source_path: p,
                        text: body,
                    });
                }
            }
            text.clear();
        };

        for line in raw.lines() {
            if line.trim() == "---" {
                flush(&mut current_path, &mut current_text, &mut templates);
                continue;
            }
            if let Some(path) = line.trim().strip_prefix("# Source:") {
                flush(&mut current_path, &mut current_text, &mut templates);
                current_path = Some(path.trim().to_string());
                continue;
            }
            current_text.push_str(line);
            current_text.push('\n');
        }
        flush(&mut current_path, &mut current_text, &mut templates);

        Self { raw, templates }
    }

    /// The rendered document for a chart-relative template path. The path
    /// in `# Source:` markers is prefixed with the chart name, so matching
    /// is by suffix.
    pub fn template(&self, relative_path: &str) -> Option<&RenderedTemplate> {
        self.templates
            .iter()
            .find(|t| t.source_path == relative_path || t.source_path.ends_with(relative_path))
    }
}

/// External renderer contract
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        chart_root: &Path,
        release: &str,
        template_subset: Option<&str>,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RenderOutput, RenderFailure>;
}

/// Renderer backed by the `helm template` subprocess
pub struct HelmRenderer {
    binary: String,
    timeout: Duration,
}

impl HelmRenderer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for HelmRenderer {
    fn default() -> Self {
        Self::new("helm", Duration::from_secs(10))
    }
}

#[async_trait]
impl Renderer for HelmRenderer {
    async fn render(
        &self,
        chart_root: &Path,
        release: &str,
        template_subset: Option<&str>,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RenderOutput, RenderFailure> {
        let mut command = tokio::process::Command::new(&self.binary);
        command.arg("template").arg(release).arg(chart_root);
        if let Some(subset) = template_subset {
            command.arg("--show-only").arg(subset);
        }
        for (key, value) in overrides {
            command.arg("--set").arg(format!("{}={}", key, value));
        }
        command.kill_on_drop(true);

        tracing::debug!("rendering {} (release {})", chart_root.display(), release);
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(RenderFailure::Timeout),
            Ok(Err(io_error)) => return Err(RenderFailure::Unavailable(io_error.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(RenderFailure::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(RenderOutput::parse(
            String::from_utf8_lossy(&output.stdout).to_string(),
        ))
    }
}
