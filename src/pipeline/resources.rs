//! Resource resolution: manifest image entries → rehomed object-store URLs.
//!
//! ## Path fallback
//!
//! Manifest hrefs are frequently wrong in the wild: percent-encoded, carrying
//! fragments, or declared relative to a directory the author never names.
//! Each href is first normalised (fragment stripped, percent-decoded, dot
//! segments resolved), then probed against an ordered candidate list: the
//! normalised path itself, the path joined under the descriptor's directory,
//! then each configured content root. The first candidate with a matching
//! container entry wins; if none match, the entry becomes a non-fatal
//! warning and resolution continues.
//!
//! Entries are processed on a bounded worker pool, but the output is sorted
//! by normalised path, so results are deterministic regardless of completion
//! order.

use crate::config::IngestConfig;
use crate::container::parser::{resolve_relative, Container, PackageDescriptor};
use crate::error::ItemError;
use crate::gateway::ObjectStore;
use crate::model::Resource;
use futures::stream::{self, StreamExt};
use percent_encoding::percent_decode_str;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Resolve every manifest image entry, upload each to the object store, and
/// return the resource rows plus per-item warnings. Never fails as a whole;
/// a book with zero resolvable resources still ingests.
pub async fn resolve_resources(
    container: &Mutex<Container>,
    descriptor: &PackageDescriptor,
    book_id: Uuid,
    store: &Arc<dyn ObjectStore>,
    config: &IngestConfig,
) -> (Vec<Resource>, Vec<ItemError>) {
    // Dedup by normalised path: two manifest ids pointing at the same file
    // rehome once.
    let mut seen: HashSet<String> = HashSet::new();
    let mut targets: Vec<(String, String, Option<String>)> = Vec::new();
    for entry in descriptor.manifest.values() {
        if !entry.is_image() {
            continue;
        }
        let normalized = normalize_href(&entry.href);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        targets.push((entry.href.clone(), normalized, entry.media_type.clone()));
    }
    targets.sort_by(|a, b| a.1.cmp(&b.1));

    let total = targets.len();
    let done = AtomicUsize::new(0);
    debug!("resolving {total} manifest resources for book {book_id}");

    let results: Vec<Result<Resource, ItemError>> = stream::iter(targets)
        .map(|(href, normalized, media_type)| {
            let done = &done;
            async move {
                let result = resolve_one(
                    container,
                    descriptor,
                    book_id,
                    store,
                    config,
                    &href,
                    &normalized,
                    media_type.as_deref(),
                )
                .await;

                if let Some(cb) = &config.progress_callback {
                    match &result {
                        Ok(_) => {
                            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                            cb.on_resource_resolved(&normalized, finished, total);
                        }
                        Err(e) => cb.on_resource_failed(&href, &e.to_string()),
                    }
                }
                result
            }
        })
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let mut resources = Vec::new();
    let mut warnings = Vec::new();
    for result in results {
        match result {
            Ok(resource) => resources.push(resource),
            Err(e) => warnings.push(e),
        }
    }
    resources.sort_by(|a, b| a.original_path.cmp(&b.original_path));

    (resources, warnings)
}

#[allow(clippy::too_many_arguments)]
async fn resolve_one(
    container: &Mutex<Container>,
    descriptor: &PackageDescriptor,
    book_id: Uuid,
    store: &Arc<dyn ObjectStore>,
    config: &IngestConfig,
    href: &str,
    normalized: &str,
    media_type: Option<&str>,
) -> Result<Resource, ItemError> {
    let candidates = candidate_paths(normalized, &descriptor.root_dir, &config.content_roots);

    // Lock scope covers the probe and the chunked read only, never the
    // upload, so one slow upload does not serialise the whole stage.
    let (found_path, chunks) = {
        let mut container = container.lock().await;
        let found = candidates
            .iter()
            .find(|path| container.has_entry(path))
            .cloned()
            .ok_or_else(|| ItemError::ResourceResolution {
                href: href.to_string(),
                detail: format!("no candidate path matched (tried: {})", candidates.join(", ")),
            })?;
        let chunks = container
            .read_entry_chunks(&found, config.resource_chunk_bytes)
            .map_err(|e| ItemError::ResourceResolution {
                href: href.to_string(),
                detail: e.to_string(),
            })?;
        (found, chunks)
    };

    let mime_type = media_type
        .map(|m| m.to_string())
        .or_else(|| {
            mime_guess::from_path(normalized)
                .first()
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let object_path = format!("books/{book_id}/resources/{normalized}");
    let url = upload_with_retry(store, config, &object_path, chunks, &mime_type)
        .await
        .map_err(|detail| ItemError::ResourceResolution {
            href: href.to_string(),
            detail,
        })?;

    debug!("resource '{found_path}' rehomed to '{url}'");
    Ok(Resource {
        id: Uuid::new_v4(),
        book_id,
        original_path: normalized.to_string(),
        rehomed_url: url,
        resource_type: "image".to_string(),
        mime_type,
    })
}

/// Upload with per-item exponential backoff. Chunks are refcounted, so the
/// clone per attempt copies chunk handles, not payloads.
async fn upload_with_retry(
    store: &Arc<dyn ObjectStore>,
    config: &IngestConfig,
    object_path: &str,
    chunks: Vec<bytes::Bytes>,
    mime_type: &str,
) -> Result<String, String> {
    use crate::error::RetryClass;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match store.put_object(object_path, chunks.clone(), mime_type).await {
            Ok(url) => return Ok(url),
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let delay_ms = crate::error::backoff_delay_ms(config.retry_backoff_ms, attempt);
                warn!(
                    "upload of '{object_path}' failed (attempt {attempt}/{}): {e}; \
                     retrying in {delay_ms}ms",
                    config.max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Normalise a manifest href: strip any fragment, percent-decode, and
/// resolve `.`/`..` segments. The result never escapes the container root.
pub(crate) fn normalize_href(href: &str) -> String {
    let without_fragment = href.split('#').next().unwrap_or(href);
    let decoded = percent_decode_str(without_fragment).decode_utf8_lossy();
    resolve_relative("", &decoded)
}

/// Ordered, deduplicated candidate container paths for a normalised href.
pub(crate) fn candidate_paths(
    normalized: &str,
    root_dir: &str,
    content_roots: &[String],
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    push(normalized.to_string());
    if !root_dir.is_empty() {
        push(resolve_relative(root_dir, normalized));
    }
    for root in content_roots {
        push(format!("{root}/{normalized}"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryObjectStore;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_container(entries: &[(&str, &[u8])]) -> Container {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content).unwrap();
        }
        Container::open(writer.finish().unwrap().into_inner()).unwrap()
    }

    fn descriptor_with_images(root_dir: &str, hrefs: &[&str]) -> PackageDescriptor {
        let mut descriptor = PackageDescriptor {
            root_dir: root_dir.to_string(),
            ..Default::default()
        };
        for (i, href) in hrefs.iter().enumerate() {
            let id = format!("img{i}");
            descriptor.manifest.insert(
                id.clone(),
                crate::container::parser::ManifestEntry {
                    id,
                    href: href.to_string(),
                    media_type: Some("image/png".to_string()),
                    properties: None,
                },
            );
        }
        descriptor
    }

    #[test]
    fn normalize_strips_fragment_and_decodes() {
        assert_eq!(normalize_href("images/my%20pic.png#frag"), "images/my pic.png");
        assert_eq!(normalize_href("./a/../b.png"), "b.png");
        assert_eq!(normalize_href("../../b.png"), "b.png");
    }

    #[test]
    fn candidates_are_ordered_and_deduped() {
        let roots = vec!["OEBPS".to_string(), "OPS".to_string()];
        let candidates = candidate_paths("images/a.png", "OEBPS", &roots);
        assert_eq!(
            candidates,
            vec![
                "images/a.png".to_string(),
                "OEBPS/images/a.png".to_string(),
                "OPS/images/a.png".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn resolves_via_root_dir_candidate() {
        let container = Mutex::new(build_container(&[(
            "OEBPS/images/a.png",
            b"png-bytes".as_slice(),
        )]));
        let descriptor = descriptor_with_images("OEBPS", &["images/a.png"]);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let book_id = Uuid::new_v4();

        let (resources, warnings) = resolve_resources(
            &container,
            &descriptor,
            book_id,
            &store,
            &IngestConfig::default(),
        )
        .await;

        assert!(warnings.is_empty(), "got: {warnings:?}");
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].original_path, "images/a.png");
        assert_eq!(resources[0].mime_type, "image/png");
        assert_eq!(
            resources[0].rehomed_url,
            format!("memory://books/{book_id}/resources/images/a.png")
        );
    }

    #[tokio::test]
    async fn falls_back_to_content_roots() {
        // Entry lives under a content root the descriptor never mentions.
        let container = Mutex::new(build_container(&[(
            "OPS/images/a.png",
            b"png-bytes".as_slice(),
        )]));
        let descriptor = descriptor_with_images("", &["images/a.png"]);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let (resources, warnings) = resolve_resources(
            &container,
            &descriptor,
            Uuid::new_v4(),
            &store,
            &IngestConfig::default(),
        )
        .await;

        assert!(warnings.is_empty(), "got: {warnings:?}");
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_entry_is_a_warning_not_a_failure() {
        let container = Mutex::new(build_container(&[("other.txt", b"x".as_slice())]));
        let descriptor =
            descriptor_with_images("OEBPS", &["images/ghost.png", "images/real.png"]);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let (resources, warnings) = resolve_resources(
            &container,
            &descriptor,
            Uuid::new_v4(),
            &store,
            &IngestConfig::default(),
        )
        .await;

        assert!(resources.is_empty());
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].to_string().contains("no candidate path matched"));
    }

    #[tokio::test]
    async fn duplicate_hrefs_rehome_once() {
        let container = Mutex::new(build_container(&[(
            "OEBPS/images/a.png",
            b"png-bytes".as_slice(),
        )]));
        // Two manifest ids, same normalised target.
        let descriptor =
            descriptor_with_images("OEBPS", &["images/a.png", "images/./a.png#cover"]);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let (resources, warnings) = resolve_resources(
            &container,
            &descriptor,
            Uuid::new_v4(),
            &store,
            &IngestConfig::default(),
        )
        .await;

        assert!(warnings.is_empty(), "got: {warnings:?}");
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn percent_encoded_href_resolves() {
        let container = Mutex::new(build_container(&[(
            "OEBPS/images/my pic.png",
            b"png-bytes".as_slice(),
        )]));
        let descriptor = descriptor_with_images("OEBPS", &["images/my%20pic.png"]);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let (resources, warnings) = resolve_resources(
            &container,
            &descriptor,
            Uuid::new_v4(),
            &store,
            &IngestConfig::default(),
        )
        .await;

        assert!(warnings.is_empty(), "got: {warnings:?}");
        assert_eq!(resources[0].original_path, "images/my pic.png");
    }
}
