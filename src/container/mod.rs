//! Container handling: the zip package, its descriptor, and what comes out.
//!
//! An EPUB container is a zip archive with a fixed pointer file
//! (`META-INF/container.xml`) referencing an XML package descriptor that
//! declares the manifest (all files), the spine (reading order), and the
//! book metadata.
//!
//! 1. [`parser`]   — open the zip, follow the pointer, parse the descriptor
//! 2. [`metadata`] — map raw descriptor metadata to a normalized record
//! 3. [`chapters`] — walk the spine in order, loading each entry's markup
//!
//! Everything here is pure with respect to the outside world: the only I/O
//! is reads against the in-memory archive.

pub mod chapters;
pub mod metadata;
pub mod parser;
