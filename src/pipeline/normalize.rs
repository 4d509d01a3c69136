//! Markup normalisation: chapter HTML → deterministic Markdown.
//!
//! ## Why Markdown in the middle?
//!
//! The segmenter downstream is a pure line-oriented function; giving it one
//! canonical text form keeps it independent of every HTML quirk and makes
//! re-ingestion idempotent — the same chapter markup always yields the same
//! Markdown string, byte for byte.
//!
//! ## Spacing rule
//!
//! Adjacent text nodes and inline elements are concatenated with **no**
//! separator of their own; only whitespace present in the source collapses
//! to a single space. Scripts that do not use spacing as a word boundary
//! (Chinese, Japanese) would otherwise gain artificial inter-character
//! spaces at every `<span>`/`<em>` boundary.
//!
//! Mapping: `h1`–`h6` become `#`-prefixed lines 1:1; paragraph and division
//! elements become blank-line-separated blocks; `img` elements become
//! whole-line `![alt](src)` references, even mid-paragraph, so the
//! segmenter can match them structurally.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("static selector"));

/// Convert one chapter's markup to Markdown. Deterministic: same input,
/// same output.
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut blocks: Vec<String> = Vec::new();

    if let Some(body) = document.select(&BODY).next() {
        let mut loose = String::new();
        walk_container(&body, &mut loose, &mut blocks);
        flush(&mut loose, &mut blocks);
    }

    blocks.join("\n\n")
}

/// Walk a block-level container. Loose text between block children
/// accumulates into `inline` and flushes as its own paragraph.
fn walk_container(el: &ElementRef, inline: &mut String, blocks: &mut Vec<String>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            append_text(inline, text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };

        match child_el.value().name() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                flush(inline, blocks);
                let level = child_el.value().name()[1..]
                    .parse::<usize>()
                    .unwrap_or(1);
                let text = inline_text(&child_el);
                if !text.is_empty() {
                    blocks.push(format!("{} {}", "#".repeat(level), text));
                }
            }
            "p" | "blockquote" | "pre" | "li" | "dt" | "dd" | "figcaption" | "caption" | "td"
            | "th" => {
                flush(inline, blocks);
                let mut para = String::new();
                walk_inline(&child_el, &mut para, blocks);
                flush(&mut para, blocks);
            }
            "img" => {
                flush(inline, blocks);
                push_image(&child_el, blocks);
            }
            "br" => inline.push('\n'),
            "script" | "style" => {}
            "div" | "section" | "article" | "main" | "aside" | "header" | "footer" | "figure"
            | "nav" | "ul" | "ol" | "dl" | "table" | "thead" | "tbody" | "tfoot" | "tr" | "hr" => {
                flush(inline, blocks);
                walk_container(&child_el, inline, blocks);
                flush(inline, blocks);
            }
            // Inline elements (span, a, em, strong, …) contribute their
            // content with no separator of their own.
            _ => walk_inline(&child_el, inline, blocks),
        }
    }
}

/// Walk inline content: text accumulates, `br` becomes a soft newline, and
/// an embedded `img` flushes the open text and lands on its own line.
fn walk_inline(el: &ElementRef, inline: &mut String, blocks: &mut Vec<String>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            append_text(inline, text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        match child_el.value().name() {
            "img" => {
                flush(inline, blocks);
                push_image(&child_el, blocks);
            }
            "br" => inline.push('\n'),
            "script" | "style" => {}
            _ => walk_inline(&child_el, inline, blocks),
        }
    }
}

fn push_image(el: &ElementRef, blocks: &mut Vec<String>) {
    if let Some(src) = el.value().attr("src") {
        let alt = el.value().attr("alt").unwrap_or("");
        blocks.push(format!("![{}]({})", collapse(alt), src));
    }
}

/// All descendant text of an element, whitespace-collapsed.
fn inline_text(el: &ElementRef) -> String {
    let mut buf = String::new();
    for text in el.text() {
        append_text(&mut buf, text);
    }
    buf.trim().to_string()
}

/// Append raw text, collapsing whitespace runs to a single space. No space
/// is ever introduced where the source had none.
fn append_text(buf: &mut String, raw: &str) {
    let mut last_ws = buf.is_empty() || buf.ends_with(' ') || buf.ends_with('\n');
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_ws {
                buf.push(' ');
                last_ws = true;
            }
        } else {
            buf.push(ch);
            last_ws = false;
        }
    }
}

fn collapse(raw: &str) -> String {
    let mut buf = String::new();
    append_text(&mut buf, raw);
    buf.trim().to_string()
}

/// Emit the accumulated inline text as a block, if any.
fn flush(inline: &mut String, blocks: &mut Vec<String>) {
    let trimmed = inline.trim();
    if !trimmed.is_empty() {
        blocks.push(trimmed.to_string());
    }
    inline.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn headings_map_one_to_one() {
        let md = html_to_markdown("<html><body><h1>One</h1><h3>Three</h3><h6>Six</h6></body></html>");
        assert_eq!(md, "# One\n\n### Three\n\n###### Six");
    }

    #[test]
    fn paragraphs_are_blank_line_separated() {
        let md = html_to_markdown("<body><p>First.</p><p>Second.</p></body>");
        assert_eq!(md, "First.\n\nSecond.");
    }

    #[test]
    fn divisions_behave_like_paragraph_containers() {
        let md = html_to_markdown("<body><div>Alpha</div><div><p>Beta</p></div></body>");
        assert_eq!(md, "Alpha\n\nBeta");
    }

    #[test]
    fn no_artificial_spacing_across_inline_boundaries() {
        // CJK text split across spans must not gain spaces.
        let md = html_to_markdown("<body><p>你好<span>世界</span><em>！</em></p></body>");
        assert_eq!(md, "你好世界！");
    }

    #[test]
    fn source_whitespace_collapses_to_one_space() {
        let md = html_to_markdown("<body><p>hello\n   <b>big</b>  world</p></body>");
        assert_eq!(md, "hello big world");
    }

    #[test]
    fn standalone_image_becomes_whole_line_reference() {
        let md = html_to_markdown(r#"<body><img src="images/cover.jpg" alt="cover"/></body>"#);
        assert_eq!(md, "![cover](images/cover.jpg)");
    }

    #[test]
    fn image_inside_paragraph_lands_on_its_own_line() {
        let md = html_to_markdown(
            r#"<body><p>before <img src="fig.png" alt="a figure"/> after</p></body>"#,
        );
        assert_eq!(md, "before\n\n![a figure](fig.png)\n\nafter");
    }

    #[test]
    fn missing_alt_defaults_to_empty() {
        let md = html_to_markdown(r#"<body><img src="x.png"/></body>"#);
        assert_eq!(md, "![](x.png)");
    }

    #[test]
    fn script_and_style_are_dropped() {
        let md = html_to_markdown(
            "<body><p>keep</p><script>var x = 1;</script><style>p{}</style></body>",
        );
        assert_eq!(md, "keep");
    }

    #[test]
    fn br_joins_lines_within_one_paragraph() {
        let md = html_to_markdown("<body><p>line one<br/>line two</p></body>");
        assert_eq!(md, "line one\nline two");
    }

    #[test]
    fn deterministic_output() {
        let html = "<body><h2>T</h2><p>a<b>b</b></p><div>c</div></body>";
        assert_eq!(html_to_markdown(html), html_to_markdown(html));
    }

    #[test]
    fn empty_body_yields_empty_string() {
        assert_eq!(html_to_markdown("<body></body>"), "");
    }
}
