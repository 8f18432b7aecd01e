//! File inclusion: `[[!target]]` markers expanded into the referenced file
//! content before markdown conversion.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use lru::LruCache;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::application::stats::{
    METRIC_INCLUSION_CACHE_HIT, METRIC_INCLUSION_CACHE_MISS, PreviewStats,
};

use super::cache_capacity;

/// Upper bound on cached included files before oldest entries are dropped.
const FILE_CACHE_CAPACITY: usize = 50;

/// Name variants tried when resolving an inclusion target, in order.
const CANDIDATE_EXTENSIONS: [&str; 3] = ["", ".md", ".markdown"];

static INCLUSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[!([^\]|]+)(?:\|([^\]]+))?\]\]").expect("inclusion pattern must compile")
});

struct CachedFile {
    modified: SystemTime,
    content: String,
}

/// Expands inclusion markers one level deep, with an mtime-validated file
/// cache and a per-render cycle guard.
///
/// The guard tracks paths only within a single top-level expansion; callers
/// reset it before each render. Included content is spliced verbatim and is
/// not re-scanned for further inclusion markers.
pub struct InclusionResolver {
    base_dir: PathBuf,
    files: LruCache<PathBuf, CachedFile>,
    guard: HashSet<PathBuf>,
    stats: Arc<PreviewStats>,
}

impl InclusionResolver {
    pub fn new(base_dir: impl Into<PathBuf>, stats: Arc<PreviewStats>) -> Self {
        Self {
            base_dir: base_dir.into(),
            files: LruCache::new(cache_capacity(FILE_CACHE_CAPACITY)),
            guard: HashSet::new(),
            stats,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Clear the cycle guard. Must run before each top-level render.
    pub fn reset_guard(&mut self) {
        self.guard.clear();
    }

    /// Drop cached file content along with the cycle guard.
    pub fn clear(&mut self) {
        self.files.clear();
        self.guard.clear();
    }

    /// Replace every `[[!target]]` / `[[!target|title]]` marker in `text`.
    /// Infallible: unresolvable or unreadable targets become inline error
    /// markers instead of failing the render.
    pub fn expand(&mut self, text: &str) -> String {
        let mut expanded = String::with_capacity(text.len());
        let mut cursor = 0;

        for captures in INCLUSION_PATTERN.captures_iter(text) {
            let Some(matched) = captures.get(0) else {
                continue;
            };
            let target = captures.get(1).map_or("", |group| group.as_str()).trim();
            let title = captures
                .get(2)
                .map_or(target, |group| group.as_str().trim());

            expanded.push_str(&text[cursor..matched.start()]);
            expanded.push_str(&self.include(target, title));
            cursor = matched.end();
        }

        expanded.push_str(&text[cursor..]);
        expanded
    }

    fn include(&mut self, target: &str, title: &str) -> String {
        let Some(path) = self.resolve_target(target) else {
            return inclusion_error(target, "File not found");
        };

        if self.guard.contains(&path) {
            return inclusion_error(target, "Circular inclusion detected");
        }

        match self.read_cached(&path) {
            Ok(content) => {
                self.guard.insert(path);
                format!(
                    "\n\n<div class=\"included-content\">\n<div class=\"inclusion-title\">{title}</div>\n\n{content}\n\n</div>\n\n"
                )
            }
            Err(err) => inclusion_error(target, &format!("Cannot read file: {err}")),
        }
    }

    /// Try `target`, `target.md`, `target.markdown` under the base directory;
    /// the first existing regular file wins.
    fn resolve_target(&self, target: &str) -> Option<PathBuf> {
        for extension in CANDIDATE_EXTENSIONS {
            let candidate = self.base_dir.join(format!("{target}{extension}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Read through the mtime cache: an unchanged modification time serves
    /// the cached content, anything else re-reads and refreshes the entry.
    fn read_cached(&mut self, path: &Path) -> std::io::Result<String> {
        let modified = std::fs::metadata(path)?.modified()?;

        if let Some(entry) = self.files.get(path) {
            if entry.modified == modified {
                self.stats.record_inclusion_cache_hit();
                counter!(METRIC_INCLUSION_CACHE_HIT).increment(1);
                return Ok(entry.content.clone());
            }
        }

        self.stats.record_inclusion_cache_miss();
        counter!(METRIC_INCLUSION_CACHE_MISS).increment(1);

        let content = std::fs::read_to_string(path)?;
        debug!(
            target = "application::render::include",
            path = %path.display(),
            bytes = content.len(),
            "Refreshed inclusion cache entry"
        );
        self.files.put(
            path.to_path_buf(),
            CachedFile {
                modified,
                content: content.clone(),
            },
        );
        Ok(content)
    }
}

fn inclusion_error(target: &str, message: &str) -> String {
    format!(
        "\n\n<div class=\"inclusion-error\">\n<strong>Inclusion Error:</strong> {message}: {target}\n</div>\n\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(dir: &Path) -> InclusionResolver {
        InclusionResolver::new(dir, Arc::new(PreviewStats::default()))
    }

    #[test]
    fn resolves_exact_name_before_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("note"), "plain").expect("write");
        std::fs::write(dir.path().join("note.md"), "markdown").expect("write");

        let mut resolver = resolver(dir.path());
        let expanded = resolver.expand("[[!note]]");
        assert!(expanded.contains("plain"));
        assert!(!expanded.contains("markdown"));
    }

    #[test]
    fn falls_back_through_markdown_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("chapter.markdown"), "long form").expect("write");

        let mut resolver = resolver(dir.path());
        assert!(resolver.expand("[[!chapter]]").contains("long form"));
    }

    #[test]
    fn missing_target_becomes_error_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = resolver(dir.path());

        let expanded = resolver.expand("before [[!ghost]] after");
        assert!(expanded.contains("inclusion-error"));
        assert!(expanded.contains("File not found: ghost"));
        assert!(expanded.starts_with("before "));
        assert!(expanded.ends_with(" after"));
    }

    #[test]
    fn explicit_title_labels_the_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("intro.md"), "welcome").expect("write");

        let mut resolver = resolver(dir.path());
        let expanded = resolver.expand("[[!intro|Introduction]]");
        assert!(expanded.contains("<div class=\"inclusion-title\">Introduction</div>"));
        assert!(expanded.contains("welcome"));
    }

    #[test]
    fn repeated_inclusion_in_one_render_is_circular() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("note.md"), "body").expect("write");

        let mut resolver = resolver(dir.path());
        let expanded = resolver.expand("[[!note]]\n\n[[!note]]");
        assert_eq!(expanded.matches("body").count(), 1);
        assert!(expanded.contains("Circular inclusion detected: note"));
    }

    #[test]
    fn guard_reset_allows_the_next_render_to_include_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("note.md"), "body").expect("write");

        let mut resolver = resolver(dir.path());
        assert!(resolver.expand("[[!note]]").contains("body"));

        resolver.reset_guard();
        let second = resolver.expand("[[!note]]");
        assert!(second.contains("body"));
        assert!(!second.contains("Circular inclusion detected"));
    }
}
