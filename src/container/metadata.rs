//! Maps raw descriptor metadata to a normalized book-metadata record.

use super::parser::PackageDescriptor;
use serde::{Deserialize, Serialize};

/// Normalized book metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    /// Defaults to `"Untitled"` when the descriptor declares no title.
    pub title: String,
    pub author: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub date: Option<String>,
}

/// Normalize the descriptor's raw metadata fields.
pub fn extract_metadata(descriptor: &PackageDescriptor) -> BookMetadata {
    let field = |key: &str| descriptor.metadata.get(key).cloned();

    BookMetadata {
        title: field("title").unwrap_or_else(|| "Untitled".to_string()),
        author: field("creator"),
        language: field("language"),
        publisher: field("publisher"),
        date: field("date"),
    }
}

/// Resolve the cover image to a container-relative path.
///
/// EPUB 3 marks the cover with a `cover-image` manifest property; EPUB 2
/// uses a `<meta name="cover" content="{manifest-id}"/>` indirection. Both
/// are tried, properties first.
pub fn cover_path(descriptor: &PackageDescriptor) -> Option<String> {
    let by_property = descriptor.manifest.values().find(|entry| {
        entry
            .properties
            .as_deref()
            .map(|p| p.split_whitespace().any(|w| w == "cover-image"))
            .unwrap_or(false)
    });
    if let Some(entry) = by_property {
        return Some(descriptor.resolve_href(&entry.href));
    }

    let cover_id = descriptor.metadata.get("cover")?;
    let entry = descriptor.manifest.get(cover_id)?;
    Some(descriptor.resolve_href(&entry.href))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::parser::ManifestEntry;
    use std::collections::HashMap;

    fn descriptor_with(metadata: &[(&str, &str)]) -> PackageDescriptor {
        PackageDescriptor {
            root_dir: "OEBPS".into(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            manifest: HashMap::new(),
            spine: Vec::new(),
        }
    }

    #[test]
    fn title_defaults_to_untitled() {
        let meta = extract_metadata(&descriptor_with(&[("creator", "A. Author")]));
        assert_eq!(meta.title, "Untitled");
        assert_eq!(meta.author.as_deref(), Some("A. Author"));
    }

    #[test]
    fn all_fields_pass_through() {
        let meta = extract_metadata(&descriptor_with(&[
            ("title", "The Book"),
            ("creator", "A. Author"),
            ("language", "ja"),
            ("publisher", "Press"),
            ("date", "2021-03-01"),
        ]));
        assert_eq!(meta.title, "The Book");
        assert_eq!(meta.language.as_deref(), Some("ja"));
        assert_eq!(meta.publisher.as_deref(), Some("Press"));
        assert_eq!(meta.date.as_deref(), Some("2021-03-01"));
    }

    #[test]
    fn cover_via_manifest_property_wins() {
        let mut descriptor = descriptor_with(&[("cover", "other-id")]);
        descriptor.manifest.insert(
            "cov".into(),
            ManifestEntry {
                id: "cov".into(),
                href: "images/cover.jpg".into(),
                media_type: Some("image/jpeg".into()),
                properties: Some("cover-image".into()),
            },
        );
        assert_eq!(
            cover_path(&descriptor).as_deref(),
            Some("OEBPS/images/cover.jpg")
        );
    }

    #[test]
    fn cover_via_meta_indirection() {
        let mut descriptor = descriptor_with(&[("cover", "cov")]);
        descriptor.manifest.insert(
            "cov".into(),
            ManifestEntry {
                id: "cov".into(),
                href: "images/cover.jpg".into(),
                media_type: Some("image/jpeg".into()),
                properties: None,
            },
        );
        assert_eq!(
            cover_path(&descriptor).as_deref(),
            Some("OEBPS/images/cover.jpg")
        );
    }

    #[test]
    fn no_cover_declared() {
        assert_eq!(cover_path(&descriptor_with(&[("title", "T")])), None);
    }
}
