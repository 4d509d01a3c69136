//! Zip container access and package-descriptor parsing.
//!
//! ## Error mapping
//!
//! Three failure classes, kept distinct because callers abort differently:
//! a broken zip directory is [`IngestError::ContainerCorrupt`]; a missing
//! pointer file, rootfile attribute, or descriptor entry is
//! [`IngestError::ContainerInvalid`]; descriptor XML that exists but does
//! not parse is [`IngestError::MetadataParse`]. The pointer file itself
//! failing to parse counts as structural invalidity — without it there is
//! no descriptor to blame.
//!
//! All XML matching is on local names, so descriptors parse regardless of
//! namespace prefixes.

use crate::error::IngestError;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Fixed location of the pointer file inside the container.
const CONTAINER_POINTER: &str = "META-INF/container.xml";

/// One manifest entry: a declared file in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
    /// Path relative to the descriptor's directory, as declared.
    pub href: String,
    pub media_type: Option<String>,
    /// Space-separated properties, e.g. `cover-image`.
    pub properties: Option<String>,
}

impl ManifestEntry {
    /// Whether this entry declares (or its path implies) an image.
    pub fn is_image(&self) -> bool {
        match &self.media_type {
            Some(mt) => mt.starts_with("image/"),
            None => mime_guess::from_path(&self.href)
                .first()
                .map(|m| m.type_() == mime_guess::mime::IMAGE)
                .unwrap_or(false),
        }
    }
}

/// The parsed package descriptor: manifest, spine, raw metadata.
#[derive(Debug, Clone, Default)]
pub struct PackageDescriptor {
    /// Directory of the descriptor inside the container (`""` when it sits
    /// at the root). Manifest hrefs are relative to this.
    pub root_dir: String,
    /// Manifest entries keyed by id.
    pub manifest: HashMap<String, ManifestEntry>,
    /// Spine: ordered idref list defining reading order.
    pub spine: Vec<String>,
    /// Raw metadata fields: `dc:*` elements keyed by local name, plus
    /// `<meta name=… content=…>` pairs keyed by name.
    pub metadata: HashMap<String, String>,
}

impl PackageDescriptor {
    /// Spine entries resolved to manifest entries, in reading order.
    /// Idrefs with no manifest entry are yielded as errors by the chapter
    /// extractor, not silently skipped here.
    pub fn spine_entries(&self) -> impl Iterator<Item = (usize, &str, Option<&ManifestEntry>)> {
        self.spine
            .iter()
            .enumerate()
            .map(|(i, idref)| (i, idref.as_str(), self.manifest.get(idref)))
    }

    /// Resolve a manifest-relative href to a container path.
    pub fn resolve_href(&self, href: &str) -> String {
        resolve_relative(&self.root_dir, href)
    }
}

/// An opened container: the zip archive plus entry access.
#[derive(Debug)]
pub struct Container {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl Container {
    /// Open a container from raw bytes.
    pub fn open(bytes: Vec<u8>) -> Result<Self, IngestError> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| IngestError::ContainerCorrupt(e.to_string()))?;
        debug!("container opened: {} entries", archive.len());
        Ok(Self { archive })
    }

    /// Whether an entry exists at exactly this path.
    pub fn has_entry(&self, path: &str) -> bool {
        self.archive.index_for_name(path).is_some()
    }

    /// Number of entries in the archive.
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    /// Read one entry fully. Intended for small text entries (descriptor,
    /// chapter markup); resources go through [`Self::read_entry_chunks`].
    pub fn read_entry(&mut self, path: &str) -> Result<Vec<u8>, IngestError> {
        let mut file = self.archive.by_name(path).map_err(|e| match e {
            ZipError::FileNotFound => {
                IngestError::ContainerInvalid(format!("entry '{path}' not found"))
            }
            other => IngestError::ContainerCorrupt(format!("entry '{path}': {other}")),
        })?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| IngestError::ContainerCorrupt(format!("entry '{path}': {e}")))?;
        Ok(buf)
    }

    /// Read one entry as a sequence of chunks of at most `chunk_size`
    /// bytes, so a large resource never becomes one contiguous allocation.
    pub fn read_entry_chunks(
        &mut self,
        path: &str,
        chunk_size: usize,
    ) -> Result<Vec<Bytes>, IngestError> {
        let mut file = self.archive.by_name(path).map_err(|e| match e {
            ZipError::FileNotFound => {
                IngestError::ContainerInvalid(format!("entry '{path}' not found"))
            }
            other => IngestError::ContainerCorrupt(format!("entry '{path}': {other}")),
        })?;

        let mut chunks = Vec::new();
        loop {
            let mut buf = vec![0u8; chunk_size];
            let mut filled = 0;
            while filled < chunk_size {
                let n = file
                    .read(&mut buf[filled..])
                    .map_err(|e| IngestError::ContainerCorrupt(format!("entry '{path}': {e}")))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            let done = filled < chunk_size;
            buf.truncate(filled);
            chunks.push(Bytes::from(buf));
            if done {
                break;
            }
        }
        Ok(chunks)
    }

    /// Locate and parse the package descriptor.
    pub fn parse_descriptor(&mut self) -> Result<PackageDescriptor, IngestError> {
        let pointer = self.read_entry(CONTAINER_POINTER).map_err(|_| {
            IngestError::ContainerInvalid(format!("missing pointer file '{CONTAINER_POINTER}'"))
        })?;
        let pointer_xml = String::from_utf8_lossy(&pointer).into_owned();

        let opf_path = descriptor_path(&pointer_xml)?;
        debug!("package descriptor at '{opf_path}'");

        let descriptor_bytes = self.read_entry(&opf_path).map_err(|_| {
            IngestError::ContainerInvalid(format!("package descriptor '{opf_path}' not found"))
        })?;
        let descriptor_xml = String::from_utf8_lossy(&descriptor_bytes).into_owned();

        parse_descriptor_xml(&opf_path, &descriptor_xml)
    }
}

/// Extract the descriptor path from the pointer file.
fn descriptor_path(pointer_xml: &str) -> Result<String, IngestError> {
    let doc = roxmltree::Document::parse(pointer_xml)
        .map_err(|e| IngestError::ContainerInvalid(format!("pointer file unparsable: {e}")))?;

    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .and_then(|n| n.attribute("full-path"))
        .map(|p| p.to_string())
        .ok_or_else(|| {
            IngestError::ContainerInvalid("pointer file declares no rootfile full-path".into())
        })
}

/// Parse the OPF package descriptor into manifest / spine / raw metadata.
fn parse_descriptor_xml(opf_path: &str, xml: &str) -> Result<PackageDescriptor, IngestError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| IngestError::MetadataParse(e.to_string()))?;

    let root_dir = match opf_path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    };

    let mut descriptor = PackageDescriptor {
        root_dir,
        ..Default::default()
    };

    for node in doc.descendants().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            // dc:* metadata elements, keyed by local name. First
            // occurrence wins (multiple creators are common; we keep the
            // primary one).
            "title" | "creator" | "language" | "publisher" | "date" | "identifier"
            | "description" => {
                if let Some(text) = node.text() {
                    let text = text.trim();
                    if !text.is_empty() {
                        descriptor
                            .metadata
                            .entry(node.tag_name().name().to_string())
                            .or_insert_with(|| text.to_string());
                    }
                }
            }
            "meta" => {
                if let (Some(name), Some(content)) =
                    (node.attribute("name"), node.attribute("content"))
                {
                    descriptor
                        .metadata
                        .insert(name.to_string(), content.to_string());
                }
            }
            "item" => {
                if let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) {
                    descriptor.manifest.insert(
                        id.to_string(),
                        ManifestEntry {
                            id: id.to_string(),
                            href: href.to_string(),
                            media_type: node.attribute("media-type").map(|s| s.to_string()),
                            properties: node.attribute("properties").map(|s| s.to_string()),
                        },
                    );
                }
            }
            "itemref" => {
                if let Some(idref) = node.attribute("idref") {
                    descriptor.spine.push(idref.to_string());
                }
            }
            _ => {}
        }
    }

    if descriptor.manifest.is_empty() {
        return Err(IngestError::MetadataParse(
            "descriptor declares no manifest items".into(),
        ));
    }

    debug!(
        "descriptor parsed: {} manifest entries, {} spine entries",
        descriptor.manifest.len(),
        descriptor.spine.len()
    );

    Ok(descriptor)
}

/// Resolve `href` against `root`, handling `.` and `..` segments.
/// `..` pops when a segment is available and is dropped otherwise, so the
/// result never escapes the container root.
pub(crate) fn resolve_relative(root: &str, href: &str) -> String {
    let mut segments: Vec<&str> = if root.is_empty() {
        Vec::new()
    } else {
        root.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const MINIMAL_OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="3.0">
  <metadata>
    <dc:title>Test Book</dc:title>
    <dc:creator>A. Author</dc:creator>
    <dc:language>en</dc:language>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    fn build_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn pointer(full_path: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="{full_path}" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#
        )
    }

    fn minimal_container() -> Vec<u8> {
        build_container(&[
            ("META-INF/container.xml", pointer("OEBPS/content.opf").as_bytes()),
            ("OEBPS/content.opf", MINIMAL_OPF.as_bytes()),
            ("OEBPS/ch1.xhtml", b"<html><body><p>one</p></body></html>"),
            ("OEBPS/ch2.xhtml", b"<html><body><p>two</p></body></html>"),
            ("OEBPS/images/cover.jpg", &[0xFF, 0xD8, 0xFF, 0xE0]),
        ])
    }

    #[test]
    fn parses_manifest_spine_and_metadata() {
        let mut container = Container::open(minimal_container()).unwrap();
        let descriptor = container.parse_descriptor().unwrap();

        assert_eq!(descriptor.root_dir, "OEBPS");
        assert_eq!(descriptor.spine, vec!["ch1", "ch2"]);
        assert_eq!(descriptor.manifest.len(), 3);
        assert_eq!(descriptor.metadata.get("title").unwrap(), "Test Book");
        assert_eq!(descriptor.metadata.get("creator").unwrap(), "A. Author");
        assert_eq!(descriptor.metadata.get("cover").unwrap(), "cover-img");

        let cover = &descriptor.manifest["cover-img"];
        assert!(cover.is_image());
        assert_eq!(descriptor.resolve_href(&cover.href), "OEBPS/images/cover.jpg");
    }

    #[test]
    fn not_a_zip_is_corrupt() {
        let err = Container::open(b"definitely not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, IngestError::ContainerCorrupt(_)), "got: {err:?}");
    }

    #[test]
    fn missing_pointer_is_invalid() {
        let bytes = build_container(&[("mimetype", b"application/epub+zip")]);
        let mut container = Container::open(bytes).unwrap();
        let err = container.parse_descriptor().unwrap_err();
        assert!(matches!(err, IngestError::ContainerInvalid(_)), "got: {err:?}");
    }

    #[test]
    fn missing_descriptor_is_invalid() {
        let bytes = build_container(&[(
            "META-INF/container.xml",
            pointer("OEBPS/content.opf").as_bytes(),
        )]);
        let mut container = Container::open(bytes).unwrap();
        let err = container.parse_descriptor().unwrap_err();
        assert!(matches!(err, IngestError::ContainerInvalid(_)), "got: {err:?}");
    }

    #[test]
    fn malformed_descriptor_is_metadata_parse_error() {
        let bytes = build_container(&[
            ("META-INF/container.xml", pointer("book.opf").as_bytes()),
            ("book.opf", b"<package><manifest><item id='x'"),
        ]);
        let mut container = Container::open(bytes).unwrap();
        let err = container.parse_descriptor().unwrap_err();
        assert!(matches!(err, IngestError::MetadataParse(_)), "got: {err:?}");
    }

    #[test]
    fn chunked_read_bounds_allocations() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let bytes = build_container(&[
            ("META-INF/container.xml", pointer("book.opf").as_bytes()),
            ("book.opf", MINIMAL_OPF.as_bytes()),
            ("big.bin", payload.as_slice()),
        ]);
        let mut container = Container::open(bytes).unwrap();

        let chunks = container.read_entry_chunks("big.bin", 4096).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn resolve_relative_handles_dot_segments() {
        assert_eq!(resolve_relative("OEBPS", "ch1.xhtml"), "OEBPS/ch1.xhtml");
        assert_eq!(resolve_relative("OEBPS", "../images/a.png"), "images/a.png");
        assert_eq!(resolve_relative("OEBPS", "./text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_relative("", "ch1.xhtml"), "ch1.xhtml");
        // `..` past the root is dropped, never escaping the container.
        assert_eq!(resolve_relative("", "../../etc/passwd"), "etc/passwd");
    }

    #[test]
    fn rereading_same_entry_is_byte_identical() {
        let mut container = Container::open(minimal_container()).unwrap();
        let first = container.read_entry("OEBPS/images/cover.jpg").unwrap();
        let second = container.read_entry("OEBPS/images/cover.jpg").unwrap();
        assert_eq!(first, second);
    }
}
