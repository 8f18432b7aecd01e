//! The incremental rendering pipeline: inclusion expansion, markdown
//! conversion, custom-tag rewriting, and a bounded result cache in front of
//! it all.

mod backend;
mod include;
mod rewrite;
mod types;

pub use backend::{
    ComrakBackend, ConversionBackend, ConversionDispatcher, MinimalBackend, PulldownCmarkBackend,
};
pub use include::InclusionResolver;
pub use rewrite::{post_process, rewrite_equations, rewrite_wikilinks};
pub use types::{RenderError, RenderOptions, RenderedDocument};

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use metrics::{counter, histogram};
use sha2::{Digest, Sha256};

use crate::application::stats::{
    METRIC_DOCUMENT_CACHE_HIT, METRIC_DOCUMENT_CACHE_MISS, METRIC_RENDER_DURATION_MS, PreviewStats,
};

/// Upper bound on memoized document renders.
const DOCUMENT_CACHE_CAPACITY: usize = 10;

pub(crate) fn cache_capacity(requested: usize) -> NonZeroUsize {
    NonZeroUsize::new(requested).unwrap_or(NonZeroUsize::MIN)
}

/// Deterministic fingerprint of the exact text and option flags.
pub fn fingerprint(text: &str, options: RenderOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0x1f, u8::from(options.wikilinks), u8::from(options.latex)]);
    hex::encode(hasher.finalize())
}

/// Bounded memo of end-to-end conversion results, keyed by content
/// fingerprint; values keep the source text alongside the HTML.
struct DocumentCache {
    entries: LruCache<String, (String, String)>,
}

impl DocumentCache {
    fn new() -> Self {
        Self {
            entries: LruCache::new(cache_capacity(DOCUMENT_CACHE_CAPACITY)),
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.entries.get(key).map(|(_, html)| html.clone())
    }

    fn insert(&mut self, key: String, source: &str, html: String) {
        self.entries.put(key, (source.to_string(), html));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// End-to-end pipeline: inclusion expansion, backend conversion, tag
/// rewriting, and the document cache.
pub struct DocumentPipeline {
    resolver: InclusionResolver,
    dispatcher: ConversionDispatcher,
    cache: DocumentCache,
    stats: Arc<PreviewStats>,
}

impl DocumentPipeline {
    pub fn new(base_dir: impl Into<PathBuf>, stats: Arc<PreviewStats>) -> Self {
        Self {
            resolver: InclusionResolver::new(base_dir, Arc::clone(&stats)),
            dispatcher: ConversionDispatcher::new(),
            cache: DocumentCache::new(),
            stats,
        }
    }

    /// Swap in a specific conversion dispatcher. Used by tests to pin a
    /// fallback backend.
    pub fn with_dispatcher(mut self, dispatcher: ConversionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Render through the cache: a fingerprint hit returns the memoized HTML
    /// without touching the resolver or conversion backends.
    pub fn render(&mut self, text: &str, options: RenderOptions) -> RenderedDocument {
        self.render_with(text, options, false)
    }

    /// Render unconditionally, bypassing the cache lookup. The result is
    /// still stored.
    pub fn render_force(&mut self, text: &str, options: RenderOptions) -> RenderedDocument {
        self.render_with(text, options, true)
    }

    fn render_with(&mut self, text: &str, options: RenderOptions, force: bool) -> RenderedDocument {
        let started = Instant::now();
        let key = fingerprint(text, options);

        if !force {
            if let Some(html) = self.cache.get(&key) {
                self.stats.record_document_cache_hit();
                counter!(METRIC_DOCUMENT_CACHE_HIT).increment(1);
                return RenderedDocument {
                    bytes: html.len(),
                    html,
                    duration: started.elapsed(),
                    cache_hit: true,
                };
            }
        }

        self.stats.record_document_cache_miss();
        counter!(METRIC_DOCUMENT_CACHE_MISS).increment(1);

        self.resolver.reset_guard();
        let expanded = if options.wikilinks {
            self.resolver.expand(text)
        } else {
            text.to_string()
        };

        let converted = self.dispatcher.convert(&expanded, options);
        let html = post_process(&converted, options);

        self.cache.insert(key, text, html.clone());

        let duration = started.elapsed();
        histogram!(METRIC_RENDER_DURATION_MS).record(duration.as_secs_f64() * 1000.0);

        RenderedDocument {
            bytes: html.len(),
            html,
            duration,
            cache_hit: false,
        }
    }

    /// Drop all memoized documents and reset the resolver's per-render guard.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.resolver.reset_guard();
    }

    pub fn cached_documents(&self) -> usize {
        self.cache.len()
    }

    pub fn backend_name(&self) -> &'static str {
        self.dispatcher.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_text_and_flags() {
        let base = fingerprint("# Hello", RenderOptions::default());
        assert_eq!(base, fingerprint("# Hello", RenderOptions::default()));
        assert_ne!(base, fingerprint("# Hello!", RenderOptions::default()));
        assert_ne!(
            base,
            fingerprint(
                "# Hello",
                RenderOptions {
                    wikilinks: false,
                    latex: true
                }
            )
        );
        assert_ne!(
            base,
            fingerprint(
                "# Hello",
                RenderOptions {
                    wikilinks: true,
                    latex: false
                }
            )
        );
    }

    #[test]
    fn document_cache_keeps_source_and_evicts_oldest() {
        let mut cache = DocumentCache::new();
        for index in 0..=DOCUMENT_CACHE_CAPACITY {
            let key = format!("key-{index}");
            cache.insert(key, &format!("source-{index}"), format!("<p>{index}</p>"));
        }

        assert_eq!(cache.len(), DOCUMENT_CACHE_CAPACITY);
        assert!(cache.get("key-0").is_none());
        assert_eq!(cache.get("key-1"), Some("<p>1</p>".to_string()));
    }
}
