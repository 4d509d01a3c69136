//! Content segmentation: normalised Markdown → typed blocks.
//!
//! Pure text-in, blocks-out. Blank lines delimit blocks; a line of 1–6
//! leading `#` characters is a heading, a line that is exactly an
//! `![alt](src)` reference is an image, everything else accumulates into a
//! text block. Block order is the order blocks appear in the source.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::ContentBlock;

/// Matches a line that is, in its entirety, a Markdown image reference.
static IMAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!\[([^\]]*)\]\(([^)]*)\)$").expect("static regex"));

/// Split one chapter's Markdown into ordered content blocks.
pub fn segment_markdown(markdown: &str) -> Vec<ContentBlock> {
    let mut blocks: Vec<ContentBlock> = Vec::new();
    // Lines of the text block currently being accumulated, kept raw so
    // intra-block line structure survives.
    let mut open_text: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_text(&mut open_text, &mut blocks);
            continue;
        }

        if let Some(heading) = parse_heading(trimmed) {
            flush_text(&mut open_text, &mut blocks);
            if let Some(block) = heading {
                blocks.push(block);
            }
            continue;
        }

        if let Some(caps) = IMAGE_LINE.captures(trimmed) {
            flush_text(&mut open_text, &mut blocks);
            blocks.push(ContentBlock::Image {
                src: caps[2].to_string(),
                alt: caps[1].to_string(),
            });
            continue;
        }

        open_text.push(line);
    }
    flush_text(&mut open_text, &mut blocks);

    blocks
}

/// `Some(Some(block))` for a 1–6 hash heading, `Some(None)` for a 7+ hash
/// line (recognised but dropped), `None` for a non-heading line.
fn parse_heading(trimmed: &str) -> Option<Option<ContentBlock>> {
    if !trimmed.starts_with('#') {
        return None;
    }
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes > 6 {
        return Some(None);
    }
    let text = trimmed[hashes..].trim().to_string();
    Some(Some(ContentBlock::Heading {
        level: hashes as u8,
        text,
    }))
}

fn flush_text(open_text: &mut Vec<&str>, blocks: &mut Vec<ContentBlock>) {
    if open_text.is_empty() {
        return;
    }
    let text = open_text.join("\n").trim().to_string();
    open_text.clear();
    if !text.is_empty() {
        blocks.push(ContentBlock::Text { text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn heading_text_image_in_source_order() {
        let blocks =
            segment_markdown("# Chapter One\n\nHello world.\n\n![cover](images/cover.jpg)");
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Heading {
                    level: 1,
                    text: "Chapter One".into()
                },
                ContentBlock::Text {
                    text: "Hello world.".into()
                },
                ContentBlock::Image {
                    src: "images/cover.jpg".into(),
                    alt: "cover".into()
                },
            ]
        );
    }

    #[test]
    fn heading_level_equals_hash_count() {
        let blocks = segment_markdown("### Deep");
        assert_eq!(
            blocks,
            vec![ContentBlock::Heading {
                level: 3,
                text: "Deep".into()
            }]
        );
    }

    #[test]
    fn seven_hashes_is_not_a_heading_and_emits_nothing() {
        let blocks = segment_markdown("before\n####### not a heading\nafter");
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text {
                    text: "before".into()
                },
                ContentBlock::Text {
                    text: "after".into()
                },
            ]
        );
    }

    #[test]
    fn consecutive_lines_form_one_text_block() {
        let blocks = segment_markdown("line one\nline two");
        assert_eq!(
            blocks,
            vec![ContentBlock::Text {
                text: "line one\nline two".into()
            }]
        );
    }

    #[test]
    fn blank_line_splits_text_blocks() {
        let blocks = segment_markdown("one\n\ntwo");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn image_must_occupy_the_whole_line() {
        // Trailing prose keeps the line inside the text block.
        let blocks = segment_markdown("![a](b.png) and more");
        assert_eq!(
            blocks,
            vec![ContentBlock::Text {
                text: "![a](b.png) and more".into()
            }]
        );
    }

    #[test]
    fn image_interrupts_an_open_text_block() {
        let blocks = segment_markdown("before\n![fig](x.png)\nafter");
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text {
                    text: "before".into()
                },
                ContentBlock::Image {
                    src: "x.png".into(),
                    alt: "fig".into()
                },
                ContentBlock::Text {
                    text: "after".into()
                },
            ]
        );
    }

    #[test]
    fn empty_alt_is_preserved() {
        let blocks = segment_markdown("![](x.png)");
        assert_eq!(
            blocks,
            vec![ContentBlock::Image {
                src: "x.png".into(),
                alt: String::new()
            }]
        );
    }

    #[test]
    fn whitespace_only_input_yields_no_blocks() {
        assert!(segment_markdown("   \n\n  \t\n").is_empty());
    }

    #[test]
    fn empty_heading_text_is_kept_as_heading() {
        let blocks = segment_markdown("##");
        assert_eq!(
            blocks,
            vec![ContentBlock::Heading {
                level: 2,
                text: String::new()
            }]
        );
    }
}
