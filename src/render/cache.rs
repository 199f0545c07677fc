//! Render output caching
//!
//! Renderer invocations are expensive, so outputs are cached under an
//! explicit key struct with a TTL, and concurrent requests for the same
//! uncached key collapse into one in-flight render (at most one concurrent
//! render per key). Invalidation on a single template change is surgical:
//! only that template's subset entry and the whole-chart aggregate entry
//! are dropped; sibling templates keep their cached output.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use super::renderer::{RenderFailure, RenderOutput, Renderer};

/// Identity of one render invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub chart_root: PathBuf,
    pub release: String,
    /// `None` renders the whole chart; `Some` a single template
    pub template_subset: Option<String>,
    pub overrides_fingerprint: u64,
}

impl RenderKey {
    pub fn new(
        chart_root: impl Into<PathBuf>,
        release: impl Into<String>,
        template_subset: Option<String>,
        overrides: &BTreeMap<String, String>,
    ) -> Self {
        // BTreeMap iteration is sorted, so the fingerprint is stable under
        // insertion order
        let mut hasher = DefaultHasher::new();
        for (key, value) in overrides {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        Self {
            chart_root: chart_root.into(),
            release: release.into(),
            template_subset,
            overrides_fingerprint: hasher.finish(),
        }
    }
}

struct CacheEntry {
    output: Arc<RenderOutput>,
    inserted_at: Instant,
}

/// TTL'd render cache with per-key single-flight de-duplication
pub struct RenderCache {
    ttl: Duration,
    entries: RwLock<HashMap<RenderKey, CacheEntry>>,
    flights: Mutex<HashMap<RenderKey, Arc<Mutex<()>>>>,
}

impl RenderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// A fresh cached output, if present.
    pub async fn get(&self, key: &RenderKey) -> Option<Arc<RenderOutput>> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.output))
    }

    pub async fn insert(&self, key: RenderKey, output: Arc<RenderOutput>) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                output,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Render through the cache: return a fresh entry when present,
    /// otherwise run the renderer exactly once per key no matter how many
    /// callers arrive concurrently. The render itself runs in a spawned
    /// task holding the cache handle, so a caller abandoned mid-request
    /// still completes the render and populates the cache for later
    /// callers.
    pub async fn render_through(
        self: &Arc<Self>,
        renderer: Arc<dyn Renderer>,
        key: RenderKey,
        overrides: BTreeMap<String, String>,
    ) -> Result<Arc<RenderOutput>, RenderFailure> {
        if let Some(cached) = self.get(&key).await {
            tracing::debug!("render cache hit for {:?}", key.template_subset);
            return Ok(cached);
        }

        let flight = self.flight_lock(&key).await;
        let _guard = flight.lock().await;

        // A concurrent caller may have populated the cache while this one
        // waited on the flight lock
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let cache = Arc::clone(self);
        let task = tokio::spawn(async move {
            let output = renderer
                .render(
                    &key.chart_root,
                    &key.release,
                    key.template_subset.as_deref(),
                    &overrides,
                )
                .await?;
            let output = Arc::new(output);
            cache.insert(key, Arc::clone(&output)).await;
            Ok(output)
        });
        match task.await {
            Ok(result) => result,
            Err(join_error) => Err(RenderFailure::Unavailable(join_error.to_string())),
        }
    }

    async fn flight_lock(&self, key: &RenderKey) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().await;
        flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the given template's entry and the whole-chart aggregate entry
    /// for its chart, preserving sibling templates' entries.
    pub async fn invalidate_template(&self, chart_root: &Path, template: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| {
            if key.chart_root != chart_root {
                return true;
            }
            match &key.template_subset {
                None => false,
                Some(subset) => subset != template && !subset.ends_with(template),
            }
        });
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.flights.lock().await.clear();
    }
}
