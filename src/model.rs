//! Core data model: books, chapters, content blocks, resources, and the
//! ingestion job that tracks resumability.
//!
//! `ContentBlock` is a tagged variant rather than one struct with optional
//! fields: a block is exactly one of heading, text, or image, and the type
//! system should say so. Order indices live on the row types
//! ([`Chapter::order_index`], [`ContentBlockRow::order_index`]) and are
//! always derived from source position, never from completion order of
//! concurrent work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a book record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    /// Created, content not yet persisted.
    Initializing,
    /// All four stages completed.
    Ready,
    /// A stage exhausted its retry budget or hit a fatal error.
    Failed,
}

/// A book record. The id is minted at stage 1; the row is created at
/// stage 2 and updated through stage 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: Option<String>,
    /// Raw descriptor metadata that survived normalisation (language,
    /// publisher, date, and any `<meta>` fields).
    pub metadata: HashMap<String, String>,
    /// Container-relative path of the cover image, when declared.
    pub cover_path: Option<String>,
    /// Object-store URL of the raw uploaded container.
    pub asset_url: String,
    pub status: BookStatus,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One chapter row. `order_index` equals the chapter's spine position and is
/// unique per book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    pub order_index: u32,
    /// Container-relative path of the source markup entry.
    pub source_href: String,
}

/// The smallest structured unit of chapter content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// A heading with level 1–6 and the trimmed text after the markers.
    Heading { level: u8, text: String },
    /// A paragraph. Consecutive source lines are joined with `\n`.
    Text { text: String },
    /// A whole-line image reference. `alt` defaults to the empty string.
    Image { src: String, alt: String },
}

/// A persisted content block. `order_index` equals the block's position in
/// the segmenter's output array and is unique per chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlockRow {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub order_index: u32,
    pub block: ContentBlock,
}

/// A rehomed binary resource. `original_path` is the normalized
/// container-relative path and is unique per book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub book_id: Uuid,
    pub original_path: String,
    pub rehomed_url: String,
    pub resource_type: String,
    pub mime_type: String,
}

/// The four pipeline states plus the terminal failure state.
///
/// `Initializing → AssetStored → ResourcesExtracted → ContentPersisted` is
/// the success path; `Failed` is reachable from any state once a stage
/// exhausts its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Initializing,
    AssetStored,
    ResourcesExtracted,
    ContentPersisted,
    Failed,
}

impl IngestStage {
    /// The 1-based stage number whose success produces this state.
    /// `Failed` reports 0.
    pub fn number(self) -> u8 {
        match self {
            IngestStage::Initializing => 1,
            IngestStage::AssetStored => 2,
            IngestStage::ResourcesExtracted => 3,
            IngestStage::ContentPersisted => 4,
            IngestStage::Failed => 0,
        }
    }

    /// Monotonic progress value returned to the caller: 30/50/70/100.
    pub fn progress(self) -> u8 {
        match self {
            IngestStage::Initializing => 30,
            IngestStage::AssetStored => 50,
            IngestStage::ResourcesExtracted => 70,
            IngestStage::ContentPersisted => 100,
            IngestStage::Failed => 0,
        }
    }
}

/// Tracks per-book pipeline progress so any stage is safely re-invocable.
///
/// `stages_completed` never regresses — not even when `current_stage`
/// moves to [`IngestStage::Failed`] — so a caller can always resume from
/// `stages_completed + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub book_id: Uuid,
    pub current_stage: IngestStage,
    /// Number of stages that have completed successfully (0–4). Monotonic.
    pub stages_completed: u8,
    /// Retry attempts consumed by the most recent failing stage.
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl IngestionJob {
    /// A fresh job for a newly minted book id, with stage 1 recorded as
    /// complete.
    pub fn new(book_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            current_stage: IngestStage::Initializing,
            stages_completed: 1,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Record the successful completion of `stage`, clearing any previous
    /// failure. `stages_completed` only ever moves forward.
    pub fn complete(&mut self, stage: IngestStage) {
        self.current_stage = stage;
        self.stages_completed = self.stages_completed.max(stage.number());
        self.retry_count = 0;
        self.last_error = None;
    }

    /// Record a failure after `attempts` retries. Completed-stage progress
    /// is preserved so the stage can be resumed.
    pub fn fail(&mut self, attempts: u32, detail: impl Into<String>) {
        self.current_stage = IngestStage::Failed;
        self.retry_count = attempts;
        self.last_error = Some(detail.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_progress_is_monotonic() {
        let order = [
            IngestStage::Initializing,
            IngestStage::AssetStored,
            IngestStage::ResourcesExtracted,
            IngestStage::ContentPersisted,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].progress() < pair[1].progress());
            assert!(pair[0].number() < pair[1].number());
        }
        assert_eq!(IngestStage::ContentPersisted.progress(), 100);
    }

    #[test]
    fn job_failure_preserves_completed_stages() {
        let mut job = IngestionJob::new(Uuid::new_v4());
        job.complete(IngestStage::AssetStored);
        assert_eq!(job.stages_completed, 2);

        job.fail(3, "connection refused");
        assert_eq!(job.current_stage, IngestStage::Failed);
        assert_eq!(job.stages_completed, 2);
        assert_eq!(job.retry_count, 3);

        job.complete(IngestStage::ResourcesExtracted);
        assert_eq!(job.stages_completed, 3);
        assert!(job.last_error.is_none());
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn content_block_serialises_tagged() {
        let block = ContentBlock::Heading {
            level: 3,
            text: "Title".into(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type":"heading""#), "got: {json}");
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
