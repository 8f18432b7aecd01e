use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature toggles carried with every render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Expand `[[!file]]` inclusions and rewrite `[[target]]` links.
    pub wikilinks: bool,
    /// Parse `$…$` / `$$…$$` spans and preserve them for client-side math
    /// rendering.
    pub latex: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            wikilinks: true,
            latex: true,
        }
    }
}

/// Result of one end-to-end document render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub html: String,
    /// Byte length of the rendered HTML.
    pub bytes: usize,
    /// Wall-clock time spent producing the result.
    pub duration: Duration,
    /// True when the HTML came straight from the document cache.
    pub cache_hit: bool,
}

/// Pipeline-internal failures. None of these reach a viewer: backend errors
/// degrade to the minimal converter and inclusion errors render as inline
/// markers.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("markdown conversion failed: {message}")]
    Markdown { message: String },
}
