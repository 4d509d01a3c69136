//! Error types for the epub-ingest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the ingestion (or the current stage) cannot
//!   proceed at all. A corrupt container, a rejected bearer token, or a stage
//!   whose retry budget is exhausted all surface here.
//!
//! * [`ItemError`] — **Non-fatal**: a single chapter failed to load or a
//!   single resource failed to resolve, but the rest of the book is fine.
//!   These are collected into the `warnings` field of each stage response so
//!   callers can inspect partial success rather than losing the whole book to
//!   one bad entry.
//!
//! Backend errors ([`crate::gateway::GatewayError`],
//! [`crate::gateway::StoreError`]) carry their own retryability
//! classification via [`RetryClass`]; the orchestrator turns exhausted
//! retries into [`IngestError::StageFailed`] with partial counts so the
//! caller can resume from the failed stage.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the epub-ingest library.
///
/// Per-chapter and per-resource failures use [`ItemError`] and are collected
/// into stage-response warnings rather than propagated here.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("EPUB file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL, or a stage payload
    /// failed validation (empty file, missing declared metadata).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a zip container.
    #[error("File is not a zip container: '{path}'\nFirst bytes: {magic:?}")]
    NotAContainer { path: PathBuf, magic: [u8; 4] },

    // ── Container errors ──────────────────────────────────────────────────
    /// The zip directory is unreadable or an entry is damaged.
    #[error("Container is corrupt: {0}")]
    ContainerCorrupt(String),

    /// The container opened as a zip but the pointer file or the package
    /// descriptor it references is missing.
    #[error("Container is structurally invalid: {0}")]
    ContainerInvalid(String),

    /// The package descriptor XML is malformed.
    #[error("Package descriptor could not be parsed: {0}")]
    MetadataParse(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The bearer token was rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A stage was invoked before its predecessor completed for this book.
    #[error("Stage {requested} invoked for book {book_id} but only {completed} stage(s) have completed")]
    StageOrder {
        book_id: Uuid,
        requested: u8,
        completed: u8,
    },

    /// The stage exceeded its wall-clock budget. The caller may re-invoke
    /// the same stage; partial writes from the aborted attempt are
    /// overwritten or augmented on retry, never rolled back.
    #[error("Stage {stage} timed out after {secs}s for book {book_id}")]
    StageTimeout { book_id: Uuid, stage: u8, secs: u64 },

    /// A stage exhausted its retry budget (or hit a non-retryable backend
    /// error). Carries partial counts so the caller can resume from this
    /// stage rather than restarting ingestion.
    #[error(
        "Stage {stage} failed for book {book_id}: {detail} \
         ({chapters_written} chapters, {resources_written} resources written)"
    )]
    StageFailed {
        book_id: Uuid,
        stage: u8,
        chapters_written: usize,
        resources_written: usize,
        detail: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chapter or resource.
///
/// Collected into stage-response warnings; ingestion continues with
/// whatever items succeeded.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// A spine entry could not be loaded from the container.
    #[error("Chapter {index} ('{href}') could not be loaded: {detail}")]
    ChapterLoad {
        index: usize,
        href: String,
        detail: String,
    },

    /// A manifest image entry could not be resolved or uploaded.
    #[error("Resource '{href}' could not be resolved: {detail}")]
    ResourceResolution { href: String, detail: String },
}

/// Retryability classification for backend errors.
///
/// The orchestrator retries retryable errors with exponential backoff up to
/// the configured budget; a connectivity-class error additionally triggers a
/// full connection-pool reset before the retry. Non-retryable errors abort
/// the stage immediately.
pub trait RetryClass {
    /// Whether a retry has any chance of succeeding.
    fn is_retryable(&self) -> bool;

    /// Whether the failure indicates lost or broken connections, warranting
    /// a pool-wide reset.
    fn is_connectivity(&self) -> bool;
}

/// Exponential backoff delay for a 1-based retry attempt. The exponent is
/// capped and the arithmetic saturates, so an oversized retry budget can
/// never overflow the multiplication.
pub(crate) fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1).min(16)))
}
