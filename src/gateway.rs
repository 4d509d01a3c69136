//! External collaborator seams: datastore, object store, and auth.
//!
//! The pipeline never talks to a concrete database or bucket. It is handed
//! `Arc<dyn PersistenceGateway>`, `Arc<dyn ObjectStore>`, and
//! `Arc<dyn AuthVerifier>` trait objects, the same way the conversion
//! pipeline is handed its provider. That keeps every stage testable against
//! in-memory fakes and lets hosts wire in whatever backend they run.
//!
//! The in-memory implementations at the bottom of this module are shipped
//! publicly (not test-gated): the CLI uses them for dry runs, the
//! integration suite uses them as backends, and they double as reference
//! semantics — [`MemoryGateway`] upserts chapters and resources by natural
//! key, which is the recommended answer to the at-least-once duplication
//! gap of stage re-invocation. Real gateways may instead insert blindly;
//! the trait contract permits either, and callers re-invoking a stage
//! against a blind-insert gateway must expect duplicated rows.

use crate::error::RetryClass;
use crate::model::{Book, BookStatus, Chapter, ContentBlockRow, IngestionJob, Resource};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

// ── Backend error types ──────────────────────────────────────────────────

/// Errors surfaced by a [`PersistenceGateway`] implementation.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connection lost, refused, or pool unusable. Retryable, and triggers
    /// a pool-wide reset before the retry.
    #[error("datastore connectivity failure: {0}")]
    Connectivity(String),

    /// The backend accepted the call but did not answer in time. Retryable.
    #[error("datastore timed out: {0}")]
    Timeout(String),

    /// A constraint or validation rejection. Retrying cannot help.
    #[error("datastore rejected the write: {0}")]
    Constraint(String),

    /// Any other backend-side failure. Retryable up to the budget.
    #[error("datastore error: {0}")]
    Backend(String),
}

impl RetryClass for GatewayError {
    fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Constraint(_))
    }

    fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Connectivity(_))
    }
}

/// Errors surfaced by an [`ObjectStore`] implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or answered 5xx. Retryable.
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the object (bad path, quota, policy). Fatal.
    #[error("object store rejected the upload: {0}")]
    Rejected(String),
}

impl RetryClass for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// The bearer token was rejected.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct AuthRejected {
    pub reason: String,
}

// ── Traits ───────────────────────────────────────────────────────────────

/// Datastore operations the pipeline needs. Each batch call is
/// all-or-nothing; the pipeline chunks oversized batches before calling.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn insert_book(&self, book: &Book) -> Result<(), GatewayError>;
    async fn update_book_status(
        &self,
        book_id: Uuid,
        status: BookStatus,
    ) -> Result<(), GatewayError>;
    async fn select_book_by_id(&self, book_id: Uuid) -> Result<Option<Book>, GatewayError>;
    async fn insert_chapter(&self, chapter: &Chapter) -> Result<(), GatewayError>;
    async fn insert_content_blocks(&self, batch: &[ContentBlockRow]) -> Result<(), GatewayError>;
    async fn insert_resources(&self, batch: &[Resource]) -> Result<(), GatewayError>;
    async fn upsert_job(&self, job: &IngestionJob) -> Result<(), GatewayError>;
    async fn select_job(&self, book_id: Uuid) -> Result<Option<IngestionJob>, GatewayError>;
}

/// Object storage. `content` arrives as an ordered chunk sequence so no
/// implementation is forced to hold a resource as one contiguous
/// allocation; chunks are refcounted [`Bytes`] and cheap to clone on retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the object and return its public URL.
    async fn put_object(
        &self,
        path: &str,
        content: Vec<Bytes>,
        content_type: &str,
    ) -> Result<String, StoreError>;
}

/// Verifies a bearer token and yields the caller id.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify_token(&self, bearer_token: &str) -> Result<String, AuthRejected>;
}

// ── In-memory reference implementations ──────────────────────────────────

#[derive(Default)]
struct MemoryState {
    books: HashMap<Uuid, Book>,
    chapters: Vec<Chapter>,
    blocks: Vec<ContentBlockRow>,
    resources: Vec<Resource>,
    jobs: HashMap<Uuid, IngestionJob>,
}

/// An in-memory [`PersistenceGateway`].
///
/// Chapters upsert on `(book_id, order_index)` and resources on
/// `(book_id, original_path)`, so re-invoking a stage replaces rows instead
/// of duplicating them. Blocks belonging to a replaced chapter are dropped
/// before the new batch lands.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all chapters for a book, ordered by `order_index`.
    pub fn chapters_for(&self, book_id: Uuid) -> Vec<Chapter> {
        let state = self.state.lock().expect("gateway state lock");
        let mut out: Vec<Chapter> = state
            .chapters
            .iter()
            .filter(|c| c.book_id == book_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.order_index);
        out
    }

    /// Snapshot of all blocks for a chapter, ordered by `order_index`.
    pub fn blocks_for(&self, chapter_id: Uuid) -> Vec<ContentBlockRow> {
        let state = self.state.lock().expect("gateway state lock");
        let mut out: Vec<ContentBlockRow> = state
            .blocks
            .iter()
            .filter(|b| b.chapter_id == chapter_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.order_index);
        out
    }

    /// Snapshot of all resources for a book, ordered by `original_path`.
    pub fn resources_for(&self, book_id: Uuid) -> Vec<Resource> {
        let state = self.state.lock().expect("gateway state lock");
        let mut out: Vec<Resource> = state
            .resources
            .iter()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.original_path.cmp(&b.original_path));
        out
    }

    /// Total persisted block count for a book across all of its chapters.
    pub fn block_count_for(&self, book_id: Uuid) -> usize {
        let chapter_ids: Vec<Uuid> = self.chapters_for(book_id).iter().map(|c| c.id).collect();
        let state = self.state.lock().expect("gateway state lock");
        state
            .blocks
            .iter()
            .filter(|b| chapter_ids.contains(&b.chapter_id))
            .count()
    }

    pub fn book(&self, book_id: Uuid) -> Option<Book> {
        let state = self.state.lock().expect("gateway state lock");
        state.books.get(&book_id).cloned()
    }

    pub fn job(&self, book_id: Uuid) -> Option<IngestionJob> {
        let state = self.state.lock().expect("gateway state lock");
        state.jobs.get(&book_id).cloned()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn insert_book(&self, book: &Book) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn update_book_status(
        &self,
        book_id: Uuid,
        status: BookStatus,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        match state.books.get_mut(&book_id) {
            Some(book) => {
                book.status = status;
                book.updated_at = chrono::Utc::now();
                Ok(())
            }
            None => Err(GatewayError::Constraint(format!(
                "no book with id {book_id}"
            ))),
        }
    }

    async fn select_book_by_id(&self, book_id: Uuid) -> Result<Option<Book>, GatewayError> {
        let state = self.state.lock().expect("gateway state lock");
        Ok(state.books.get(&book_id).cloned())
    }

    async fn insert_chapter(&self, chapter: &Chapter) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        // Upsert by (book_id, order_index); a replaced chapter takes its
        // blocks with it so a re-run starts clean.
        if let Some(pos) = state
            .chapters
            .iter()
            .position(|c| c.book_id == chapter.book_id && c.order_index == chapter.order_index)
        {
            let old = state.chapters.remove(pos);
            state.blocks.retain(|b| b.chapter_id != old.id);
        }
        state.chapters.push(chapter.clone());
        Ok(())
    }

    async fn insert_content_blocks(&self, batch: &[ContentBlockRow]) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        state.blocks.extend_from_slice(batch);
        Ok(())
    }

    async fn insert_resources(&self, batch: &[Resource]) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        for resource in batch {
            state
                .resources
                .retain(|r| !(r.book_id == resource.book_id && r.original_path == resource.original_path));
            state.resources.push(resource.clone());
        }
        Ok(())
    }

    async fn upsert_job(&self, job: &IngestionJob) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("gateway state lock");
        state.jobs.insert(job.book_id, job.clone());
        Ok(())
    }

    async fn select_job(&self, book_id: Uuid) -> Result<Option<IngestionJob>, GatewayError> {
        let state = self.state.lock().expect("gateway state lock");
        Ok(state.jobs.get(&book_id).cloned())
    }
}

/// An in-memory [`ObjectStore`] keyed by path. Returns `memory://{path}`
/// URLs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of a stored object, if present.
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().expect("object store lock");
        objects.get(path).map(|(bytes, _)| bytes.clone())
    }

    /// Declared content type of a stored object, if present.
    pub fn content_type(&self, path: &str) -> Option<String> {
        let objects = self.objects.lock().expect("object store lock");
        objects.get(path).map(|(_, ct)| ct.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("object store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        path: &str,
        content: Vec<Bytes>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let total: usize = content.iter().map(|c| c.len()).sum();
        let mut assembled = Vec::with_capacity(total);
        for chunk in &content {
            assembled.extend_from_slice(chunk);
        }
        let mut objects = self.objects.lock().expect("object store lock");
        objects.insert(path.to_string(), (assembled, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }
}

/// An [`AuthVerifier`] backed by a static token → caller-id table.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    /// A verifier accepting exactly one token.
    pub fn single(token: impl Into<String>, caller_id: impl Into<String>) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(token.into(), caller_id.into());
        Self { tokens }
    }

    pub fn insert(&mut self, token: impl Into<String>, caller_id: impl Into<String>) {
        self.tokens.insert(token.into(), caller_id.into());
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify_token(&self, bearer_token: &str) -> Result<String, AuthRejected> {
        self.tokens
            .get(bearer_token)
            .cloned()
            .ok_or_else(|| AuthRejected {
                reason: "unknown bearer token".to_string(),
            })
    }
}
