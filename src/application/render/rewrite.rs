//! Post-conversion tag passes: structured `<x-wikilink>` / `<x-equation>`
//! tags and raw `[[…]]` brackets rewritten into their final HTML forms.

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

use super::types::RenderOptions;

static BRACKET_LINK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[([^!\]|][^\]|]*)(?:\|([^\]]+))?\]\]")
        .expect("bracket link pattern must compile")
});

/// Apply the post-conversion passes in fixed order: wiki-links, then LaTeX.
/// Each pass is skipped when its feature flag is off.
pub fn post_process(html: &str, options: RenderOptions) -> String {
    let html = if options.wikilinks {
        rewrite_wikilinks(html)
    } else {
        html.to_string()
    };

    if options.latex {
        rewrite_equations(&html)
    } else {
        html
    }
}

/// Rewrite `<x-wikilink data-target="T">TEXT</x-wikilink>` tags, then any
/// raw `[[T]]` / `[[T|TEXT]]` brackets the structured pass did not consume,
/// into `wiki:` anchors.
///
/// Captured values are reinserted verbatim: both sources are already in an
/// HTML context, so escaping here would double-encode entities.
pub fn rewrite_wikilinks(html: &str) -> String {
    let settings = RewriteStrSettings {
        element_content_handlers: vec![element!("x-wikilink", |el| {
            let target = el.get_attribute("data-target").unwrap_or_default();
            el.before(
                &format!(
                    "<a href=\"wiki:{target}\" class=\"wiki-link\" data-target=\"{target}\">"
                ),
                ContentType::Html,
            );
            el.after("</a>", ContentType::Html);
            el.remove_and_keep_content();
            Ok(())
        })],
        ..RewriteStrSettings::default()
    };

    let structured = match rewrite_str(html, settings) {
        Ok(rewritten) => rewritten,
        Err(err) => {
            warn!(
                target = "application::render::rewrite",
                error = %err,
                "Wiki-link rewrite failed; leaving HTML untouched"
            );
            html.to_string()
        }
    };

    rewrite_bracket_links(&structured)
}

/// Raw bracket forms survive the generic and minimal backends unconverted;
/// the visible text defaults to the target when no `|TEXT` part is given.
fn rewrite_bracket_links(html: &str) -> String {
    BRACKET_LINK_PATTERN
        .replace_all(html, |captures: &Captures<'_>| {
            let target = captures.get(1).map_or("", |group| group.as_str());
            let text = captures.get(2).map_or(target, |group| group.as_str());
            format!(
                "<a href=\"wiki:{target}\" class=\"wiki-link\" data-target=\"{target}\">{text}</a>"
            )
        })
        .into_owned()
}

/// Rewrite `<x-equation>` tags into `$…$` / `$$…$$` spans for client-side
/// math rendering. Backends without math support preserve literal dollar
/// spans instead, so this pass only ever sees the structured form.
pub fn rewrite_equations(html: &str) -> String {
    let settings = RewriteStrSettings {
        element_content_handlers: vec![element!("x-equation", |el| {
            let delimiter = match el.get_attribute("type").as_deref() {
                Some("display") => "$$",
                _ => "$",
            };
            el.before(delimiter, ContentType::Text);
            el.after(delimiter, ContentType::Text);
            el.remove_and_keep_content();
            Ok(())
        })],
        ..RewriteStrSettings::default()
    };

    match rewrite_str(html, settings) {
        Ok(rewritten) => rewritten,
        Err(err) => {
            warn!(
                target = "application::render::rewrite",
                error = %err,
                "Equation rewrite failed; leaving HTML untouched"
            );
            html.to_string()
        }
    }
}
