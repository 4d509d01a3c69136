//! Stage orchestration: the four-stage ingestion pipeline.
//!
//! ## The staged contract
//!
//! Ingestion is split into four independently invocable stages so a large
//! book survives interruption: (1) initialise, (2) store the raw asset and
//! create the book record, (3) extract and rehome resources, (4) persist
//! chapter content. Each stage checks that its predecessor completed via
//! the persisted [`IngestionJob`], runs under a wall-clock budget, and
//! reports a monotonic progress value (30/50/70/100) on success.
//!
//! ## Failure semantics
//!
//! Backend errors carry their own retryability classification; retryable
//! failures back off exponentially up to the configured budget, and a
//! connectivity-class failure additionally resets the connection pool
//! before the retry. An exhausted budget surfaces as
//! [`IngestError::StageFailed`] with partial write counts, the job moves to
//! [`IngestStage::Failed`] without losing completed-stage progress, and the
//! caller may re-invoke the failed stage. Partial writes are overwritten or
//! augmented on re-invocation, never rolled back.

use crate::config::IngestConfig;
use crate::container::chapters::{self, ChapterSource};
use crate::container::metadata::{self, BookMetadata};
use crate::container::parser::Container;
use crate::error::{backoff_delay_ms, IngestError, ItemError, RetryClass};
use crate::gateway::{AuthVerifier, ObjectStore, PersistenceGateway};
use crate::model::{
    Book, BookStatus, Chapter, ContentBlock, ContentBlockRow, IngestStage, IngestionJob, Resource,
};
use crate::pipeline::{input, normalize, resources, segment};
use crate::pool::PoolControl;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Stage responses ──────────────────────────────────────────────────────

/// Envelope returned by every stage. `warnings` carries non-fatal per-item
/// failures; a populated `warnings` with a successful response means
/// partial success.
#[derive(Debug, Clone, Serialize)]
pub struct StageResponse<T> {
    pub book_id: Uuid,
    pub caller_id: String,
    /// 1-based stage number that produced this response.
    pub stage: u8,
    /// Monotonic progress: 30, 50, 70, or 100.
    pub progress: u8,
    pub data: T,
    pub warnings: Vec<ItemError>,
}

/// Stage 2 payload: the created book record's essentials.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub title: String,
    pub author: Option<String>,
    pub cover_path: Option<String>,
    pub asset_url: String,
    pub spine_len: usize,
}

/// Stage 3 payload: what was rehomed.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub resolved: usize,
    pub failed: usize,
    pub resources: Vec<Resource>,
}

/// Stage 4 payload: what was persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ContentSummary {
    pub chapters_written: usize,
    pub chapters_failed: usize,
    pub blocks_written: usize,
    /// Persisted chapter rows, ordered by `order_index`.
    pub chapters: Vec<Chapter>,
}

/// Output of the end-to-end [`IngestionPipeline::ingest`] driver.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutput {
    pub book_id: Uuid,
    pub title: String,
    pub chapters_written: usize,
    pub blocks_written: usize,
    pub resources_written: usize,
    /// Non-fatal per-item failures accumulated across all stages.
    pub warnings: Vec<ItemError>,
    pub stats: IngestStats,
}

/// Timing breakdown for one end-to-end run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub total_duration_ms: u64,
    /// Per-stage wall-clock durations, indexed by stage number minus one.
    pub stage_durations_ms: [u64; 4],
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// The four-stage ingestion pipeline.
///
/// Backends are injected as trait objects so the pipeline runs unchanged
/// against production gateways and the in-memory implementations in
/// [`crate::gateway`].
pub struct IngestionPipeline {
    gateway: Arc<dyn PersistenceGateway>,
    store: Arc<dyn ObjectStore>,
    auth: Arc<dyn AuthVerifier>,
    pool: Option<Arc<dyn PoolControl>>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        store: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthVerifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            auth,
            pool: None,
            config,
        }
    }

    /// Attach a connection pool to reset on connectivity-class failures.
    pub fn with_pool(mut self, pool: Arc<dyn PoolControl>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    // ── Stage 1: initialise ──────────────────────────────────────────────

    /// Validate the upload announcement, mint a book id, and create the
    /// ingestion job. No container bytes are consumed here.
    pub async fn stage_initialize(
        &self,
        bearer_token: &str,
        filename: &str,
        file_len: u64,
        declared_title: Option<&str>,
    ) -> Result<StageResponse<()>, IngestError> {
        let caller_id = self.verify(bearer_token).await?;

        if filename.trim().is_empty() {
            return Err(IngestError::InvalidInput("filename is empty".into()));
        }
        if file_len == 0 {
            return Err(IngestError::InvalidInput("uploaded file is empty".into()));
        }
        if let Some(title) = declared_title {
            if title.trim().is_empty() {
                return Err(IngestError::InvalidInput(
                    "declared title is present but empty".into(),
                ));
            }
        }

        let book_id = Uuid::new_v4();
        self.on_stage_start(1, book_id);
        info!("stage 1: initialising book {book_id} for '{filename}' ({file_len} bytes)");

        self.bounded(book_id, 1, self.initialize_inner(caller_id, book_id))
            .await
    }

    async fn initialize_inner(
        &self,
        caller_id: String,
        book_id: Uuid,
    ) -> Result<StageResponse<()>, IngestError> {
        let job = IngestionJob::new(book_id);
        self.with_retry("create ingestion job", || self.gateway.upsert_job(&job))
            .await
            .map_err(|e| self.stage_failed(book_id, 1, 0, 0, e.to_string()))?;

        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_complete(1, IngestStage::Initializing.progress());
        }
        Ok(self.respond(book_id, caller_id, IngestStage::Initializing, (), Vec::new()))
    }

    // ── Stage 2: store asset ─────────────────────────────────────────────

    /// Upload the raw container to the object store and create the book
    /// record from the parsed package metadata.
    pub async fn stage_store_asset(
        &self,
        bearer_token: &str,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<BookSummary>, IngestError> {
        let caller_id = self.verify(bearer_token).await?;
        self.require_completed(book_id, 2).await?;
        self.on_stage_start(2, book_id);

        self.bounded(book_id, 2, self.store_asset_inner(caller_id, book_id, container_bytes))
            .await
    }

    async fn store_asset_inner(
        &self,
        caller_id: String,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<BookSummary>, IngestError> {
        let payload = Bytes::from(container_bytes);
        let mut container = Container::open(payload.to_vec())?;
        let descriptor = container.parse_descriptor()?;

        let meta = metadata::extract_metadata(&descriptor);
        let cover_path = metadata::cover_path(&descriptor);
        info!(
            "stage 2: '{}' by {}, {} spine entries",
            meta.title,
            meta.author.as_deref().unwrap_or("unknown"),
            descriptor.spine.len()
        );

        let object_path = format!("users/{caller_id}/books/{book_id}/container.epub");
        let chunks = chunk_payload(&payload, self.config.resource_chunk_bytes);
        let asset_url = self
            .with_retry("store container asset", || {
                self.store
                    .put_object(&object_path, chunks.clone(), "application/epub+zip")
            })
            .await
            .map_err(|e| self.stage_failed(book_id, 2, 0, 0, e.to_string()))?;

        // Raw descriptor fields minus the two that get dedicated columns.
        let mut raw_metadata = descriptor.metadata.clone();
        raw_metadata.remove("title");
        raw_metadata.remove("creator");

        let now = chrono::Utc::now();
        let book = Book {
            id: book_id,
            title: meta.title.clone(),
            author: meta.author.clone(),
            metadata: raw_metadata,
            cover_path: cover_path.clone(),
            asset_url: asset_url.clone(),
            status: BookStatus::Initializing,
            owner_id: caller_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.with_retry("insert book record", || self.gateway.insert_book(&book))
            .await
            .map_err(|e| self.stage_failed(book_id, 2, 0, 0, e.to_string()))?;

        self.complete_stage(book_id, IngestStage::AssetStored).await?;

        Ok(self.respond(
            book_id,
            caller_id,
            IngestStage::AssetStored,
            BookSummary {
                title: meta.title,
                author: meta.author,
                cover_path,
                asset_url,
                spine_len: descriptor.spine.len(),
            },
            Vec::new(),
        ))
    }

    // ── Stage 3: extract resources ───────────────────────────────────────

    /// Resolve every manifest image, upload each to the object store, and
    /// persist the resource rows. Unresolvable entries become warnings.
    pub async fn stage_extract_resources(
        &self,
        bearer_token: &str,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<ResourceSummary>, IngestError> {
        let caller_id = self.verify(bearer_token).await?;
        self.require_completed(book_id, 3).await?;
        self.on_stage_start(3, book_id);

        self.bounded(
            book_id,
            3,
            self.extract_resources_inner(caller_id, book_id, container_bytes),
        )
        .await
    }

    async fn extract_resources_inner(
        &self,
        caller_id: String,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<ResourceSummary>, IngestError> {
        let mut container = Container::open(container_bytes)?;
        let descriptor = container.parse_descriptor()?;
        let container = tokio::sync::Mutex::new(container);

        let (resolved, warnings) = resources::resolve_resources(
            &container,
            &descriptor,
            book_id,
            &self.store,
            &self.config,
        )
        .await;
        info!(
            "stage 3: {} resources resolved, {} failed",
            resolved.len(),
            warnings.len()
        );

        let mut written = 0usize;
        for batch in resolved.chunks(self.config.block_batch_size) {
            self.with_retry("insert resource batch", || {
                self.gateway.insert_resources(batch)
            })
            .await
            .map_err(|e| self.stage_failed(book_id, 3, 0, written, e.to_string()))?;
            written += batch.len();
        }

        self.complete_stage(book_id, IngestStage::ResourcesExtracted)
            .await?;

        Ok(self.respond(
            book_id,
            caller_id,
            IngestStage::ResourcesExtracted,
            ResourceSummary {
                resolved: resolved.len(),
                failed: warnings.len(),
                resources: resolved,
            },
            warnings,
        ))
    }

    // ── Stage 4: persist content ─────────────────────────────────────────

    /// Normalise, segment, and persist every spine chapter, then mark the
    /// book ready. Chapters that fail to load become warnings; a chapter
    /// that fails to persist after retries fails the stage.
    pub async fn stage_persist_content(
        &self,
        bearer_token: &str,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<ContentSummary>, IngestError> {
        let caller_id = self.verify(bearer_token).await?;
        self.require_completed(book_id, 4).await?;
        self.on_stage_start(4, book_id);

        self.bounded(
            book_id,
            4,
            self.persist_content_inner(caller_id, book_id, container_bytes),
        )
        .await
    }

    async fn persist_content_inner(
        &self,
        caller_id: String,
        book_id: Uuid,
        container_bytes: Vec<u8>,
    ) -> Result<StageResponse<ContentSummary>, IngestError> {
        let mut container = Container::open(container_bytes)?;
        let descriptor = container.parse_descriptor()?;

        let (sources, warnings) = chapters::extract_chapters(&mut container, &descriptor);
        let total = sources.len() + warnings.len();
        for w in &warnings {
            if let ItemError::ChapterLoad { index, detail, .. } = w {
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_chapter_failed(*index as u32, total, detail);
                }
            }
        }
        info!(
            "stage 4: {} chapters loaded, {} failed to load",
            sources.len(),
            warnings.len()
        );

        // Chapters are independent; fan out on a bounded pool. Order
        // indices come from spine positions, so completion order is
        // irrelevant to the persisted ordering.
        let results: Vec<Result<(Chapter, usize), String>> = stream::iter(sources)
            .map(|source| self.persist_chapter(book_id, source, total))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut chapters: Vec<Chapter> = Vec::new();
        let mut blocks_written = 0usize;
        let mut first_error: Option<String> = None;
        for result in results {
            match result {
                Ok((chapter, blocks)) => {
                    chapters.push(chapter);
                    blocks_written += blocks;
                }
                Err(detail) => {
                    first_error.get_or_insert(detail);
                }
            }
        }
        if let Some(detail) = first_error {
            return Err(self.stage_failed(book_id, 4, chapters.len(), 0, detail));
        }
        chapters.sort_by_key(|c| c.order_index);
        let chapters_written = chapters.len();

        self.with_retry("mark book ready", || {
            self.gateway.update_book_status(book_id, BookStatus::Ready)
        })
        .await
        .map_err(|e| self.stage_failed(book_id, 4, chapters_written, 0, e.to_string()))?;

        self.complete_stage(book_id, IngestStage::ContentPersisted)
            .await?;

        Ok(self.respond(
            book_id,
            caller_id,
            IngestStage::ContentPersisted,
            ContentSummary {
                chapters_written,
                chapters_failed: warnings.len(),
                blocks_written,
                chapters,
            },
            warnings,
        ))
    }

    /// Persist one chapter: normalise, segment, insert the chapter row,
    /// then insert its blocks in batches. Returns the persisted row and
    /// its block count.
    async fn persist_chapter(
        &self,
        book_id: Uuid,
        source: ChapterSource,
        total: usize,
    ) -> Result<(Chapter, usize), String> {
        let markdown = normalize::html_to_markdown(&source.markup);
        let blocks = segment::segment_markdown(&markdown);

        let title = blocks
            .iter()
            .find_map(|b| match b {
                ContentBlock::Heading { text, .. } if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| format!("Chapter {}", source.spine_index + 1));

        let chapter = Chapter {
            id: Uuid::new_v4(),
            book_id,
            title,
            order_index: source.spine_index as u32,
            source_href: source.href.clone(),
        };
        self.with_retry("insert chapter", || self.gateway.insert_chapter(&chapter))
            .await
            .map_err(|e| format!("chapter {} ('{}'): {e}", source.spine_index, source.href))?;

        let rows: Vec<ContentBlockRow> = blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| ContentBlockRow {
                id: Uuid::new_v4(),
                chapter_id: chapter.id,
                order_index: i as u32,
                block,
            })
            .collect();

        for batch in rows.chunks(self.config.block_batch_size) {
            self.with_retry("insert content blocks", || {
                self.gateway.insert_content_blocks(batch)
            })
            .await
            .map_err(|e| format!("chapter {} ('{}'): {e}", source.spine_index, source.href))?;
        }

        debug!(
            "chapter {} persisted: '{}', {} blocks",
            source.spine_index,
            chapter.title,
            rows.len()
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_chapter_persisted(chapter.order_index, total, rows.len());
        }
        Ok((chapter, rows.len()))
    }

    // ── End-to-end driver ────────────────────────────────────────────────

    /// Run all four stages against a local path or URL input.
    ///
    /// Warnings from stages 3 and 4 are accumulated; the run only fails on
    /// a fatal error.
    pub async fn ingest(
        &self,
        bearer_token: &str,
        input_str: &str,
    ) -> Result<IngestOutput, IngestError> {
        let total_start = Instant::now();
        let bytes = input::read_container(input_str, self.config.download_timeout_secs).await?;
        let filename = display_filename(input_str);

        let mut stage_durations_ms = [0u64; 4];
        let mut warnings = Vec::new();

        let start = Instant::now();
        let init = self
            .stage_initialize(bearer_token, &filename, bytes.len() as u64, None)
            .await?;
        stage_durations_ms[0] = start.elapsed().as_millis() as u64;
        let book_id = init.book_id;

        let start = Instant::now();
        let stored = self
            .stage_store_asset(bearer_token, book_id, bytes.clone())
            .await?;
        stage_durations_ms[1] = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let extracted = self
            .stage_extract_resources(bearer_token, book_id, bytes.clone())
            .await?;
        stage_durations_ms[2] = start.elapsed().as_millis() as u64;
        warnings.extend(extracted.warnings);

        let start = Instant::now();
        let persisted = self
            .stage_persist_content(bearer_token, book_id, bytes)
            .await?;
        stage_durations_ms[3] = start.elapsed().as_millis() as u64;
        warnings.extend(persisted.warnings);

        let total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "book {book_id} ingested in {total_duration_ms}ms: {} chapters, {} blocks, {} resources",
            persisted.data.chapters_written,
            persisted.data.blocks_written,
            extracted.data.resolved
        );

        Ok(IngestOutput {
            book_id,
            title: stored.data.title,
            chapters_written: persisted.data.chapters_written,
            blocks_written: persisted.data.blocks_written,
            resources_written: extracted.data.resolved,
            warnings,
            stats: IngestStats {
                total_duration_ms,
                stage_durations_ms,
            },
        })
    }

    // ── Shared plumbing ──────────────────────────────────────────────────

    async fn verify(&self, bearer_token: &str) -> Result<String, IngestError> {
        self.auth
            .verify_token(bearer_token)
            .await
            .map_err(|e| IngestError::Auth(e.to_string()))
    }

    /// Load the job and check that stages `1..requested` have completed.
    async fn require_completed(
        &self,
        book_id: Uuid,
        requested: u8,
    ) -> Result<IngestionJob, IngestError> {
        let job = self
            .with_retry("load ingestion job", || self.gateway.select_job(book_id))
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))?;

        match job {
            None => Err(IngestError::StageOrder {
                book_id,
                requested,
                completed: 0,
            }),
            Some(job) if job.stages_completed < requested - 1 => Err(IngestError::StageOrder {
                book_id,
                requested,
                completed: job.stages_completed,
            }),
            Some(job) => Ok(job),
        }
    }

    /// Run a stage body under the configured wall-clock budget.
    async fn bounded<T>(
        &self,
        book_id: Uuid,
        stage: u8,
        body: impl Future<Output = Result<StageResponse<T>, IngestError>>,
    ) -> Result<StageResponse<T>, IngestError> {
        let budget = Duration::from_secs(self.config.stage_timeout_secs);
        match tokio::time::timeout(budget, body).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.mark_failed(book_id, e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                warn!("stage {stage} for book {book_id} exceeded its {budget:?} budget");
                self.mark_failed(book_id, format!("stage exceeded {}s budget", budget.as_secs()))
                    .await;
                Err(IngestError::StageTimeout {
                    book_id,
                    stage,
                    secs: self.config.stage_timeout_secs,
                })
            }
        }
    }

    /// Retry a backend call with exponential backoff; a connectivity-class
    /// failure resets the connection pool before the retry.
    async fn with_retry<T, E, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, E>
    where
        E: RetryClass + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    if e.is_connectivity() {
                        if let Some(pool) = &self.pool {
                            warn!("{op_name}: connectivity failure, resetting connection pool");
                            pool.reset();
                        }
                    }
                    let delay_ms = backoff_delay_ms(self.config.retry_backoff_ms, attempt);
                    warn!(
                        "{op_name} failed (attempt {attempt}/{}): {e}; retrying in {delay_ms}ms",
                        self.config.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a stage success on the job.
    async fn complete_stage(&self, book_id: Uuid, stage: IngestStage) -> Result<(), IngestError> {
        let mut job = self
            .with_retry("load ingestion job", || self.gateway.select_job(book_id))
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))?
            .unwrap_or_else(|| IngestionJob::new(book_id));
        job.complete(stage);
        self.with_retry("record stage completion", || self.gateway.upsert_job(&job))
            .await
            .map_err(|e| self.stage_failed(book_id, stage.number(), 0, 0, e.to_string()))?;

        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_complete(stage.number(), stage.progress());
        }
        Ok(())
    }

    fn on_stage_start(&self, stage: u8, book_id: Uuid) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(stage, book_id);
        }
    }

    fn respond<T>(
        &self,
        book_id: Uuid,
        caller_id: String,
        stage: IngestStage,
        data: T,
        warnings: Vec<ItemError>,
    ) -> StageResponse<T> {
        StageResponse {
            book_id,
            caller_id,
            stage: stage.number(),
            progress: stage.progress(),
            data,
            warnings,
        }
    }

    /// Build the stage-failure error carrying partial write counts.
    fn stage_failed(
        &self,
        book_id: Uuid,
        stage: u8,
        chapters_written: usize,
        resources_written: usize,
        detail: String,
    ) -> IngestError {
        IngestError::StageFailed {
            book_id,
            stage,
            chapters_written,
            resources_written,
            detail,
        }
    }

    /// Move the job to `Failed` (preserving `stages_completed`) and the
    /// book to `Failed`, best-effort. The book row only exists from
    /// stage 2 onwards, so a missing row is expected early on.
    async fn mark_failed(&self, book_id: Uuid, detail: String) {
        if let Ok(Some(mut job)) = self.gateway.select_job(book_id).await {
            job.fail(self.config.max_retries, &detail);
            if let Err(e) = self.gateway.upsert_job(&job).await {
                warn!("failed to record job failure for book {book_id}: {e}");
            }
        }
        if let Err(e) = self
            .gateway
            .update_book_status(book_id, BookStatus::Failed)
            .await
        {
            debug!("could not mark book {book_id} failed: {e}");
        }
    }
}

// ── Inspection helpers ───────────────────────────────────────────────────

/// What [`inspect`] reports about a container without ingesting it.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerReport {
    pub metadata: BookMetadata,
    pub cover_path: Option<String>,
    /// Spine entries as resolved container paths, in reading order.
    pub spine: Vec<String>,
    pub entry_count: usize,
    pub image_count: usize,
}

/// Parse a container from raw bytes and report its structure.
pub fn inspect_bytes(bytes: Vec<u8>) -> Result<ContainerReport, IngestError> {
    let mut container = Container::open(bytes)?;
    let entry_count = container.entry_count();
    let descriptor = container.parse_descriptor()?;

    let spine = descriptor
        .spine_entries()
        .map(|(_, idref, entry)| match entry {
            Some(e) => descriptor.resolve_href(&e.href),
            None => format!("<missing manifest entry '{idref}'>"),
        })
        .collect();
    let image_count = descriptor.manifest.values().filter(|e| e.is_image()).count();

    Ok(ContainerReport {
        metadata: metadata::extract_metadata(&descriptor),
        cover_path: metadata::cover_path(&descriptor),
        spine,
        entry_count,
        image_count,
    })
}

/// Resolve a local path or URL and report the container's structure.
pub async fn inspect(input_str: &str, timeout_secs: u64) -> Result<ContainerReport, IngestError> {
    let bytes = input::read_container(input_str, timeout_secs).await?;
    inspect_bytes(bytes)
}

/// Split the payload into refcounted chunks without copying.
fn chunk_payload(payload: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(payload.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + chunk_size).min(payload.len());
        chunks.push(payload.slice(offset..end));
        offset = end;
    }
    chunks
}

/// A display name for logs and the stage-1 announcement.
fn display_filename(input_str: &str) -> String {
    input_str
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("upload.epub")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunk_payload_covers_every_byte() {
        let payload = Bytes::from((0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
        let chunks = chunk_payload(&payload, 4096);
        assert_eq!(chunks.len(), 3);
        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(reassembled, payload.to_vec());
    }

    #[test]
    fn chunk_payload_empty_input() {
        assert!(chunk_payload(&Bytes::new(), 4096).is_empty());
    }

    #[test]
    fn display_filename_variants() {
        assert_eq!(display_filename("/tmp/book.epub"), "book.epub");
        assert_eq!(display_filename("https://example.com/a/b.epub"), "b.epub");
        assert_eq!(display_filename(""), "upload.epub");
    }
}
