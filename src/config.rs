//! Configuration types for EPUB ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across stages, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.

use crate::error::IngestError;
use crate::progress::IngestProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Configuration for an ingestion run.
///
/// Built via [`IngestConfig::builder()`] or using
/// [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use epub_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .concurrency(4)
///     .max_retries(5)
///     .block_batch_size(100)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Bounded worker limit for per-item fan-out in stages 3 and 4. Default: 8.
    ///
    /// Resources and chapters are independent, so stages 3 and 4 dispatch
    /// them onto a bounded pool. The bound caps connection pressure on the
    /// object store and datastore; raising it past the datastore pool size
    /// only moves the queueing from here to the pool.
    pub concurrency: usize,

    /// Maximum retry attempts for a transient backend failure. Default: 3.
    ///
    /// Connectivity blips and overloaded backends are transient; three
    /// retries catch the vast majority. Auth and malformed-input errors are
    /// never retried — they surface immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids the thundering-herd problem where N concurrent workers retry
    /// simultaneously against a recovering backend.
    pub retry_backoff_ms: u64,

    /// Maximum content blocks per datastore batch insert. Default: 200.
    ///
    /// Each batch call is all-or-nothing, so oversized chapters are chunked
    /// here rather than pushed through as one giant statement.
    pub block_batch_size: usize,

    /// Chunk size in bytes for streaming container entries. Default: 64 KiB.
    ///
    /// A resource is read and uploaded as a sequence of chunks of this size
    /// so peak memory stays bounded regardless of resource size.
    pub resource_chunk_bytes: usize,

    /// Hard wall-clock budget per stage invocation in seconds. Default: 30.
    ///
    /// Exceeding it aborts the stage with a timeout failure; the caller may
    /// re-invoke the same stage. Already-written partial data is overwritten
    /// or augmented on retry, not rolled back.
    pub stage_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Ordered content-root directories probed when a manifest href does not
    /// resolve literally. Default: `OEBPS`, `OPS`, `EPUB`, `content`.
    ///
    /// Injectable so new container conventions are testable additions rather
    /// than code changes.
    pub content_roots: Vec<String>,

    /// Optional progress callback fired on stage and per-item events.
    pub progress_callback: Option<Arc<dyn IngestProgressCallback>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            retry_backoff_ms: 500,
            block_batch_size: 200,
            resource_chunk_bytes: 64 * 1024,
            stage_timeout_secs: 30,
            download_timeout_secs: 120,
            content_roots: vec![
                "OEBPS".to_string(),
                "OPS".to_string(),
                "EPUB".to_string(),
                "content".to_string(),
            ],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("block_batch_size", &self.block_batch_size)
            .field("resource_chunk_bytes", &self.resource_chunk_bytes)
            .field("stage_timeout_secs", &self.stage_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("content_roots", &self.content_roots)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn block_batch_size(mut self, n: usize) -> Self {
        self.config.block_batch_size = n.max(1);
        self
    }

    pub fn resource_chunk_bytes(mut self, n: usize) -> Self {
        self.config.resource_chunk_bytes = n.max(1024);
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stage_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Replace the ordered content-root fallback list.
    pub fn content_roots(mut self, roots: Vec<String>) -> Self {
        self.config.content_roots = roots;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn IngestProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.block_batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "block_batch_size must be ≥ 1".into(),
            ));
        }
        if c.resource_chunk_bytes < 1024 {
            return Err(IngestError::InvalidConfig(
                "resource_chunk_bytes must be ≥ 1024".into(),
            ));
        }
        Ok(self.config)
    }
}
