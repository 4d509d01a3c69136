//! Spine-order chapter loading.
//!
//! Output order always equals spine order: the spine index is assigned
//! before any loading happens, so a failed entry leaves a gap in the
//! warnings, never a shifted index. Per-chapter load failures are
//! collected and non-fatal — ingestion proceeds with whatever chapters
//! succeeded.

use super::parser::{Container, PackageDescriptor};
use crate::error::ItemError;
use tracing::{debug, warn};

/// One loaded spine entry, before normalisation and segmentation.
#[derive(Debug, Clone)]
pub struct ChapterSource {
    /// Position in the spine; becomes the chapter's `order_index`.
    pub spine_index: usize,
    /// Container path the markup was loaded from.
    pub href: String,
    /// Raw markup, decoded lossily as UTF-8.
    pub markup: String,
}

/// Load every spine entry's markup, in declared order.
pub fn extract_chapters(
    container: &mut Container,
    descriptor: &PackageDescriptor,
) -> (Vec<ChapterSource>, Vec<ItemError>) {
    let mut sources = Vec::with_capacity(descriptor.spine.len());
    let mut failures = Vec::new();

    for (index, idref, entry) in descriptor.spine_entries() {
        let entry = match entry {
            Some(e) => e,
            None => {
                warn!("spine idref '{idref}' has no manifest entry");
                failures.push(ItemError::ChapterLoad {
                    index,
                    href: idref.to_string(),
                    detail: "spine idref has no manifest entry".into(),
                });
                continue;
            }
        };

        let href = descriptor.resolve_href(&entry.href);
        match container.read_entry(&href) {
            Ok(bytes) => {
                debug!("chapter {index}: loaded '{href}' ({} bytes)", bytes.len());
                sources.push(ChapterSource {
                    spine_index: index,
                    href,
                    markup: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            Err(e) => {
                warn!("chapter {index}: failed to load '{href}': {e}");
                failures.push(ItemError::ChapterLoad {
                    index,
                    href,
                    detail: e.to_string(),
                });
            }
        }
    }

    (sources, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn container_with(entries: &[(&str, &str)]) -> Container {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        Container::open(writer.finish().unwrap().into_inner()).unwrap()
    }

    fn opf(spine_hrefs: &[&str]) -> String {
        let items: String = spine_hrefs
            .iter()
            .enumerate()
            .map(|(i, href)| {
                format!(r#"<item id="c{i}" href="{href}" media-type="application/xhtml+xml"/>"#)
            })
            .collect();
        let refs: String = (0..spine_hrefs.len())
            .map(|i| format!(r#"<itemref idref="c{i}"/>"#))
            .collect();
        format!(
            r#"<package><metadata><title>T</title></metadata><manifest>{items}</manifest><spine>{refs}</spine></package>"#
        )
    }

    #[test]
    fn output_order_equals_spine_order() {
        let opf = opf(&["b.xhtml", "a.xhtml", "c.xhtml"]);
        let mut container = container_with(&[
            ("META-INF/container.xml", r#"<container><rootfiles><rootfile full-path="pkg.opf"/></rootfiles></container>"#),
            ("pkg.opf", &opf),
            ("a.xhtml", "<p>A</p>"),
            ("b.xhtml", "<p>B</p>"),
            ("c.xhtml", "<p>C</p>"),
        ]);
        let descriptor = container.parse_descriptor().unwrap();

        let (sources, failures) = extract_chapters(&mut container, &descriptor);
        assert!(failures.is_empty());
        let hrefs: Vec<&str> = sources.iter().map(|s| s.href.as_str()).collect();
        assert_eq!(hrefs, vec!["b.xhtml", "a.xhtml", "c.xhtml"]);
        let indices: Vec<usize> = sources.iter().map(|s| s.spine_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn missing_entry_is_nonfatal_and_keeps_indices() {
        let opf = opf(&["a.xhtml", "gone.xhtml", "c.xhtml"]);
        let mut container = container_with(&[
            ("META-INF/container.xml", r#"<container><rootfiles><rootfile full-path="pkg.opf"/></rootfiles></container>"#),
            ("pkg.opf", &opf),
            ("a.xhtml", "<p>A</p>"),
            ("c.xhtml", "<p>C</p>"),
        ]);
        let descriptor = container.parse_descriptor().unwrap();

        let (sources, failures) = extract_chapters(&mut container, &descriptor);
        assert_eq!(sources.len(), 2);
        assert_eq!(failures.len(), 1);
        // Survivors keep their spine indices; nothing shifts down.
        assert_eq!(sources[0].spine_index, 0);
        assert_eq!(sources[1].spine_index, 2);
        assert!(matches!(
            &failures[0],
            ItemError::ChapterLoad { index: 1, .. }
        ));
    }
}
