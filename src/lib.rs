//! # epub-ingest
//!
//! Ingest EPUB containers into structured, queryable book content.
//!
//! ## Why this crate?
//!
//! An EPUB is a zip of loosely related XHTML files glued together by an XML
//! package descriptor — fine for e-readers, useless for applications that
//! want to query, annotate, or re-render book content. This crate parses the
//! container, extracts metadata and spine-ordered chapters, normalises each
//! chapter's markup into deterministic Markdown, segments it into typed
//! content blocks, and rehomes embedded resources into object storage —
//! producing rows a datastore can actually serve.
//!
//! ## Pipeline Overview
//!
//! ```text
//! EPUB
//!  │
//!  ├─ Stage 1  Initialise   validate the announced upload, mint a book id   (30%)
//!  ├─ Stage 2  Store asset  upload raw container, parse descriptor,
//!  │                        create the book record                          (50%)
//!  ├─ Stage 3  Resources    resolve manifest images with path fallbacks,
//!  │                        rehome to object storage                        (70%)
//!  └─ Stage 4  Content      spine order → Markdown → typed blocks,
//!                           persist chapters and blocks, mark book ready   (100%)
//! ```
//!
//! Stages are independently invocable and resumable: each checks its
//! predecessor completed, persists its own completion, and survives
//! re-invocation by upserting rather than duplicating. Transient backend
//! failures retry with exponential backoff; connectivity-class failures
//! additionally reset the connection pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use epub_ingest::{
//!     IngestConfig, IngestionPipeline, MemoryGateway, MemoryObjectStore, StaticTokenVerifier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = IngestionPipeline::new(
//!         Arc::new(MemoryGateway::new()),
//!         Arc::new(MemoryObjectStore::new()),
//!         Arc::new(StaticTokenVerifier::single("secret", "user-1")),
//!         IngestConfig::default(),
//!     );
//!     let output = pipeline.ingest("secret", "book.epub").await?;
//!     println!("{}: {} chapters, {} blocks", output.title,
//!         output.chapters_written, output.blocks_written);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `epub-ingest` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! epub-ingest = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod container;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use container::metadata::BookMetadata;
pub use error::{IngestError, ItemError, RetryClass};
pub use gateway::{
    AuthRejected, AuthVerifier, GatewayError, MemoryGateway, MemoryObjectStore, ObjectStore,
    PersistenceGateway, StaticTokenVerifier, StoreError,
};
pub use ingest::{
    inspect, inspect_bytes, BookSummary, ContainerReport, ContentSummary, IngestOutput,
    IngestStats, IngestionPipeline, ResourceSummary, StageResponse,
};
pub use model::{
    Book, BookStatus, Chapter, ContentBlock, ContentBlockRow, IngestStage, IngestionJob, Resource,
};
pub use pool::{ConnectionPool, PoolControl, PooledConn};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
