//! Rendering correlation
//!
//! Everything needed to answer questions about rendered output: the
//! external renderer boundary, the TTL'd single-flight render cache, the
//! symbol-mapping algorithm, and the [`CorrelationService`] that ties them
//! together for the LSP backend. Renderer failures never propagate — every
//! path degrades to `None` and the non-rendered resolution pipeline keeps
//! working.

pub mod cache;
pub mod correlate;
pub mod renderer;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

pub use cache::{RenderCache, RenderKey};
pub use correlate::{
    create_symbol_mapping, LineMapping, MappedPosition, MatchMethod, SymbolMapping, TokenMapping,
};
pub use renderer::{HelmRenderer, RenderFailure, RenderOutput, RenderedTemplate, Renderer};

/// Builds and caches symbol mappings between chart templates and their
/// rendered output.
pub struct CorrelationService {
    renderer: Arc<dyn Renderer>,
    cache: Arc<RenderCache>,
    /// (chart id, template path) -> mapping; entries are immutable and
    /// dropped wholesale on invalidation, never patched
    mappings: RwLock<HashMap<(String, String), Arc<SymbolMapping>>>,
}

impl CorrelationService {
    pub fn new(renderer: Arc<dyn Renderer>, ttl: Duration) -> Self {
        Self {
            renderer,
            cache: Arc::new(RenderCache::new(ttl)),
            mappings: RwLock::new(HashMap::new()),
        }
    }

    fn chart_id(chart_root: &Path, release: &str) -> String {
        format!("{}@{}", chart_root.display(), release)
    }

    /// The symbol mapping for one template of a chart, rendering through
    /// the cache when needed. `None` when the renderer fails or the
    /// template produced no output — callers degrade silently.
    pub async fn mapping_for(
        &self,
        chart_root: &Path,
        release: &str,
        template_path: &str,
        source_text: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Option<Arc<SymbolMapping>> {
        let chart_id = Self::chart_id(chart_root, release);
        let map_key = (chart_id.clone(), template_path.to_string());

        if let Some(mapping) = self.mappings.read().await.get(&map_key) {
            return Some(Arc::clone(mapping));
        }

        let render_key = RenderKey::new(
            chart_root,
            release,
            Some(template_path.to_string()),
            overrides,
        );
        let output = match self
            .cache
            .render_through(Arc::clone(&self.renderer), render_key, overrides.clone())
            .await
        {
            Ok(output) => output,
            Err(failure) => {
                tracing::warn!("correlation unavailable: {}", failure);
                return None;
            }
        };

        let rendered = output.template(template_path)?;
        let mapping = Arc::new(create_symbol_mapping(
            &chart_id,
            template_path,
            source_text,
            &rendered.text,
        ));
        self.mappings
            .write()
            .await
            .insert(map_key, Arc::clone(&mapping));
        Some(mapping)
    }

    /// Map a rendered position back to the template source.
    pub async fn position_lookup(
        &self,
        chart_root: &Path,
        release: &str,
        template_path: &str,
        source_text: &str,
        overrides: &BTreeMap<String, String>,
        rendered_line: usize,
        character: u32,
    ) -> Option<MappedPosition> {
        let mapping = self
            .mapping_for(chart_root, release, template_path, source_text, overrides)
            .await?;
        mapping.position_lookup(rendered_line, character)
    }

    /// Invalidate one template's render and mapping entries plus the
    /// whole-chart aggregate, keeping siblings intact.
    pub async fn invalidate_template(&self, chart_root: &Path, template: &str) {
        self.cache.invalidate_template(chart_root, template).await;
        let chart_prefix = format!("{}@", chart_root.display());
        self.mappings.write().await.retain(|(chart_id, doc_id), _| {
            !(chart_id.starts_with(&chart_prefix)
                && (doc_id == template || doc_id.ends_with(template)))
        });
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
        self.mappings.write().await.clear();
    }
}
