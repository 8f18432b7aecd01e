//! Markdown conversion strategies, in capability order: the full comrak
//! engine, the generic pulldown-cmark library, and a minimal built-in
//! converter that needs no parser at all.

use comrak::{
    Arena, format_html,
    nodes::{AstNode, NodeValue},
    parse_document,
};
use once_cell::sync::Lazy;
use pulldown_cmark::{Options as CmarkOptions, Parser, html as cmark_html};
use regex::{Captures, Regex};
use tracing::warn;

use super::types::{RenderError, RenderOptions};

/// One markdown-to-HTML strategy. Implementations are pure: the same text
/// and options always produce the same output.
pub trait ConversionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy can run in this build. Selection walks the
    /// capability order once and keeps the first backend that volunteers.
    fn available(&self) -> bool {
        true
    }

    fn convert(&self, text: &str, options: RenderOptions) -> Result<String, RenderError>;
}

/// Primary backend: comrak with tables, strikethrough, task lists and
/// autolinks, plus wiki-link and math extensions gated on the request flags.
///
/// Wiki-link and math nodes are rewritten in the AST into structured
/// `<x-wikilink>` / `<x-equation>` tags so the post-processing passes see one
/// uniform shape regardless of markdown context.
#[derive(Debug, Default)]
pub struct ComrakBackend;

impl ComrakBackend {
    fn options(options: RenderOptions) -> comrak::Options<'static> {
        let mut comrak_options = comrak::Options::default();

        let ext = &mut comrak_options.extension;
        ext.table = true;
        ext.strikethrough = true;
        ext.tasklist = true;
        ext.autolink = true;
        ext.wikilinks_title_after_pipe = options.wikilinks;
        ext.math_dollars = options.latex;

        let render = &mut comrak_options.render;
        render.github_pre_lang = true;
        // Raw HTML must pass through: inclusion containers and the injected
        // structured tags are HTML already.
        render.r#unsafe = true;

        comrak_options
    }
}

impl ConversionBackend for ComrakBackend {
    fn name(&self) -> &'static str {
        "comrak"
    }

    fn convert(&self, text: &str, options: RenderOptions) -> Result<String, RenderError> {
        let comrak_options = Self::options(options);
        let arena = Arena::new();
        let root = parse_document(&arena, text, &comrak_options);

        rewrite_custom_spans(root);

        let mut html = String::new();
        format_html(root, &comrak_options, &mut html).map_err(|err| RenderError::Markdown {
            message: err.to_string(),
        })?;
        Ok(html)
    }
}

/// Replace wiki-link and math nodes with the structured tag forms consumed
/// by the post-processor.
fn rewrite_custom_spans<'a>(node: &'a AstNode<'a>) {
    let replacement = {
        let data = node.data.borrow();
        match &data.value {
            NodeValue::WikiLink(link) => {
                let label = collect_inline_text(node);
                let text = if label.trim().is_empty() {
                    link.url.clone()
                } else {
                    label
                };
                Some(format!(
                    "<x-wikilink data-target=\"{}\">{}</x-wikilink>",
                    escape_attribute(&link.url),
                    escape_text(&text)
                ))
            }
            NodeValue::Math(math) => {
                let attribute = if math.display_math {
                    " type=\"display\""
                } else {
                    ""
                };
                Some(format!(
                    "<x-equation{attribute}>{}</x-equation>",
                    escape_text(&math.literal)
                ))
            }
            _ => None,
        }
    };

    if let Some(html) = replacement {
        node.data.borrow_mut().value = NodeValue::HtmlInline(html);
        while let Some(child) = node.first_child() {
            child.detach();
        }
        return;
    }

    let mut child = node.first_child();
    while let Some(next) = child {
        rewrite_custom_spans(next);
        child = next.next_sibling();
    }
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' | '\r' | '\t' => escaped.push(' '),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn collect_inline_text(node: &AstNode<'_>) -> String {
    fn walk(node: &AstNode<'_>, buffer: &mut String) {
        {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => buffer.push_str(text),
                NodeValue::Code(code) => buffer.push_str(&code.literal),
                NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
                _ => {}
            }
        }
        let mut child = node.first_child();
        while let Some(next) = child {
            walk(next, buffer);
            child = next.next_sibling();
        }
    }

    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        walk(next, &mut text);
        child = next.next_sibling();
    }
    text
}

/// Generic fallback: pulldown-cmark with tables, strikethrough, task lists
/// and footnotes. The engine has no math syntax, so LaTeX spans are swapped
/// for opaque placeholders around the conversion and restored afterwards.
#[derive(Debug, Default)]
pub struct PulldownCmarkBackend;

impl ConversionBackend for PulldownCmarkBackend {
    fn name(&self) -> &'static str {
        "pulldown-cmark"
    }

    fn convert(&self, text: &str, options: RenderOptions) -> Result<String, RenderError> {
        let (protected, spans) = if options.latex {
            protect_math_spans(text)
        } else {
            (text.to_string(), Vec::new())
        };

        let mut cmark_options = CmarkOptions::empty();
        cmark_options.insert(CmarkOptions::ENABLE_TABLES);
        cmark_options.insert(CmarkOptions::ENABLE_STRIKETHROUGH);
        cmark_options.insert(CmarkOptions::ENABLE_TASKLISTS);
        cmark_options.insert(CmarkOptions::ENABLE_FOOTNOTES);

        let parser = Parser::new_ext(&protected, cmark_options);
        let mut html = String::with_capacity(protected.len() * 2);
        cmark_html::push_html(&mut html, parser);

        Ok(restore_math_spans(html, &spans))
    }
}

/// Last-resort converter with no third-party engine: headers, bold, italic,
/// inline code, and blank-line paragraph splitting.
#[derive(Debug, Default)]
pub struct MinimalBackend;

static H1_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^# (.+)$").expect("h1 pattern must compile"));
static H2_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^## (.+)$").expect("h2 pattern must compile"));
static H3_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^### (.+)$").expect("h3 pattern must compile"));
static BOLD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern must compile"));
static ITALIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*(.+?)\*").expect("italic pattern must compile"));
static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`(.+?)`").expect("code pattern must compile"));

impl ConversionBackend for MinimalBackend {
    fn name(&self) -> &'static str {
        "minimal"
    }

    fn convert(&self, text: &str, options: RenderOptions) -> Result<String, RenderError> {
        let (protected, spans) = if options.latex {
            protect_math_spans(text)
        } else {
            (text.to_string(), Vec::new())
        };

        let html = H3_PATTERN.replace_all(&protected, "<h3>$1</h3>");
        let html = H2_PATTERN.replace_all(&html, "<h2>$1</h2>");
        let html = H1_PATTERN.replace_all(&html, "<h1>$1</h1>");
        let html = BOLD_PATTERN.replace_all(&html, "<strong>$1</strong>");
        let html = ITALIC_PATTERN.replace_all(&html, "<em>$1</em>");
        let html = CODE_PATTERN.replace_all(&html, "<code>$1</code>");

        let html = split_paragraphs(&html);
        Ok(restore_math_spans(html, &spans))
    }
}

/// Group plain lines into `<p>` blocks; headers and protected math blocks
/// stand alone.
fn split_paragraphs(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>, paragraphs: &mut Vec<String>| {
        if !current.is_empty() {
            paragraphs.push(format!("<p>{}</p>", current.join(" ")));
            current.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut current, &mut paragraphs);
        } else if trimmed.starts_with("<h") || trimmed.contains("LATEXBLOCK") {
            flush(&mut current, &mut paragraphs);
            paragraphs.push(trimmed.to_string());
        } else {
            current.push(trimmed);
        }
    }
    flush(&mut current, &mut paragraphs);

    paragraphs.join("\n")
}

static DISPLAY_MATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$(.+?)\$\$").expect("display math pattern must compile"));
static INLINE_MATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([^$\n]+?)\$").expect("inline math pattern must compile"));

/// Swap `$$…$$` and `$…$` spans for placeholders that survive markdown
/// conversion untouched. Returns the protected text and the spans in
/// placeholder order.
fn protect_math_spans(text: &str) -> (String, Vec<String>) {
    let mut spans: Vec<String> = Vec::new();

    let blocks = DISPLAY_MATH_PATTERN.replace_all(text, |captures: &Captures<'_>| {
        let index = spans.len();
        spans.push(captures[0].to_string());
        format!("\n\nLATEXBLOCK{index}ENDBLOCK\n\n")
    });

    let inline = INLINE_MATH_PATTERN.replace_all(&blocks, |captures: &Captures<'_>| {
        let index = spans.len();
        spans.push(captures[0].to_string());
        format!("LATEXINLINE{index}ENDINLINE")
    });

    (inline.into_owned(), spans)
}

fn restore_math_spans(html: String, spans: &[String]) -> String {
    spans.iter().enumerate().fold(html, |acc, (index, span)| {
        acc.replace(&format!("<p>LATEXBLOCK{index}ENDBLOCK</p>"), span)
            .replace(&format!("LATEXBLOCK{index}ENDBLOCK"), span)
            .replace(&format!("LATEXINLINE{index}ENDINLINE"), span)
    })
}

/// Ordered backend selection. Construction walks the capability order once
/// and keeps the first available strategy; a later failure in that strategy
/// degrades straight to the minimal converter, never to the middle tier.
pub struct ConversionDispatcher {
    selected: Box<dyn ConversionBackend>,
    emergency: MinimalBackend,
}

impl ConversionDispatcher {
    pub fn new() -> Self {
        Self::select(vec![
            Box::new(ComrakBackend),
            Box::new(PulldownCmarkBackend),
            Box::new(MinimalBackend),
        ])
    }

    /// Pick the first available strategy from `candidates`. Injectable for
    /// tests that pin a specific backend.
    pub fn select(candidates: Vec<Box<dyn ConversionBackend>>) -> Self {
        let selected = candidates
            .into_iter()
            .find(|backend| backend.available())
            .unwrap_or_else(|| Box::new(MinimalBackend));
        Self {
            selected,
            emergency: MinimalBackend,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.selected.name()
    }

    /// Convert markdown to HTML. A failure in the selected backend is logged
    /// and degrades to the minimal converter rather than surfacing.
    pub fn convert(&self, text: &str, options: RenderOptions) -> String {
        match self.selected.convert(text, options) {
            Ok(html) => html,
            Err(err) => {
                warn!(
                    target = "application::render::backend",
                    backend = self.selected.name(),
                    error = %err,
                    "Conversion backend failed; using minimal converter"
                );
                self.emergency
                    .convert(text, options)
                    .unwrap_or_default()
            }
        }
    }
}

impl Default for ConversionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comrak_emits_structured_wikilink_tags() {
        let backend = ComrakBackend;
        let html = backend
            .convert("[[Home|Go Home]]", RenderOptions::default())
            .expect("convert");
        assert!(html.contains("<x-wikilink data-target=\"Home\">Go Home</x-wikilink>"));
    }

    #[test]
    fn comrak_emits_structured_equation_tags() {
        let backend = ComrakBackend;
        let html = backend
            .convert("Euler: $e^{i\\pi}$ and $$x^2$$", RenderOptions::default())
            .expect("convert");
        assert!(html.contains("<x-equation>e^{i\\pi}</x-equation>"));
        assert!(html.contains("<x-equation type=\"display\">x^2</x-equation>"));
    }

    #[test]
    fn comrak_leaves_brackets_alone_when_wikilinks_disabled() {
        let backend = ComrakBackend;
        let options = RenderOptions {
            wikilinks: false,
            latex: true,
        };
        let html = backend.convert("[[Home]]", options).expect("convert");
        assert!(html.contains("[[Home]]"));
        assert!(!html.contains("x-wikilink"));
    }

    #[test]
    fn pulldown_preserves_math_spans_verbatim() {
        let backend = PulldownCmarkBackend;
        let html = backend
            .convert(
                "# Title\n\n$$a_1 + a_2$$\n\nInline $b*c$ stays.",
                RenderOptions::default(),
            )
            .expect("convert");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("$$a_1 + a_2$$"));
        assert!(html.contains("$b*c$"));
        assert!(!html.contains("LATEXBLOCK"));
        assert!(!html.contains("LATEXINLINE"));
    }

    #[test]
    fn minimal_converter_covers_basic_markup() {
        let backend = MinimalBackend;
        let html = backend
            .convert(
                "# Title\n\nSome **bold** and *italic* with `code`.\n\nSecond paragraph.",
                RenderOptions::default(),
            )
            .expect("convert");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<em>italic</em>"));
        assert!(html.contains("<code>code</code>"));
        assert!(html.contains("<p>Second paragraph.</p>"));
    }

    #[test]
    fn minimal_converter_restores_protected_math() {
        let backend = MinimalBackend;
        let html = backend
            .convert("$$x^2$$\n\ntext with $y$", RenderOptions::default())
            .expect("convert");
        assert!(html.contains("$$x^2$$"));
        assert!(html.contains("$y$"));
    }

    struct FailingBackend;

    impl ConversionBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn convert(&self, _text: &str, _options: RenderOptions) -> Result<String, RenderError> {
            Err(RenderError::Markdown {
                message: "boom".to_string(),
            })
        }
    }

    struct UnavailableBackend;

    impl ConversionBackend for UnavailableBackend {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn available(&self) -> bool {
            false
        }

        fn convert(&self, _text: &str, _options: RenderOptions) -> Result<String, RenderError> {
            Err(RenderError::Markdown {
                message: "should not run".to_string(),
            })
        }
    }

    #[test]
    fn dispatcher_skips_unavailable_backends() {
        let dispatcher = ConversionDispatcher::select(vec![
            Box::new(UnavailableBackend),
            Box::new(PulldownCmarkBackend),
        ]);
        assert_eq!(dispatcher.backend_name(), "pulldown-cmark");
    }

    #[test]
    fn dispatcher_degrades_to_minimal_on_backend_failure() {
        let dispatcher = ConversionDispatcher::select(vec![Box::new(FailingBackend)]);
        let html = dispatcher.convert("# Still works", RenderOptions::default());
        assert!(html.contains("<h1>Still works</h1>"));
    }
}
