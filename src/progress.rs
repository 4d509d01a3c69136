//! Progress-callback trait for per-stage and per-item ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a book.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a broadcast channel, a job table, or a terminal
//! progress bar — without the library knowing anything about how the host
//! application communicates. The trait is `Send + Sync` because stages 3
//! and 4 fire per-item events from concurrent workers.

use std::sync::Arc;
use uuid::Uuid;

/// Called by the pipeline as it works through the four stages.
///
/// Per-item methods (`on_resource_*`, `on_chapter_*`) may be called
/// concurrently from different workers; implementations must protect shared
/// mutable state with appropriate synchronisation primitives.
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait IngestProgressCallback: Send + Sync {
    /// Called when a stage begins executing.
    fn on_stage_start(&self, stage: u8, book_id: Uuid) {
        let _ = (stage, book_id);
    }

    /// Called when a stage completes, with its monotonic progress value
    /// (30/50/70/100).
    fn on_stage_complete(&self, stage: u8, progress: u8) {
        let _ = (stage, progress);
    }

    /// Called when one manifest resource has been resolved and uploaded.
    fn on_resource_resolved(&self, original_path: &str, done: usize, total: usize) {
        let _ = (original_path, done, total);
    }

    /// Called when one manifest resource failed to resolve (non-fatal).
    fn on_resource_failed(&self, href: &str, detail: &str) {
        let _ = (href, detail);
    }

    /// Called when one chapter's blocks have been persisted.
    fn on_chapter_persisted(&self, order_index: u32, total: usize, block_count: usize) {
        let _ = (order_index, total, block_count);
    }

    /// Called when a chapter could not be loaded from the container
    /// (non-fatal; ingestion proceeds with the remaining chapters).
    fn on_chapter_failed(&self, order_index: u32, total: usize, detail: &str) {
        let _ = (order_index, total, detail);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        stages: AtomicUsize,
        resources: AtomicUsize,
        chapters: AtomicUsize,
        failures: AtomicUsize,
    }

    impl IngestProgressCallback for TrackingCallback {
        fn on_stage_complete(&self, _stage: u8, _progress: u8) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_resource_resolved(&self, _original_path: &str, _done: usize, _total: usize) {
            self.resources.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chapter_persisted(&self, _order_index: u32, _total: usize, _block_count: usize) {
            self.chapters.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chapter_failed(&self, _order_index: u32, _total: usize, _detail: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(1, Uuid::nil());
        cb.on_stage_complete(1, 30);
        cb.on_resource_resolved("images/cover.jpg", 1, 3);
        cb.on_resource_failed("images/missing.png", "no candidate path matched");
        cb.on_chapter_persisted(0, 2, 5);
        cb.on_chapter_failed(1, 2, "entry truncated");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            stages: AtomicUsize::new(0),
            resources: AtomicUsize::new(0),
            chapters: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        };

        tracker.on_stage_complete(1, 30);
        tracker.on_stage_complete(2, 50);
        tracker.on_resource_resolved("a.png", 1, 2);
        tracker.on_chapter_persisted(0, 1, 3);
        tracker.on_chapter_failed(0, 1, "boom");

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.resources.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.chapters.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn IngestProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_stage_start(1, Uuid::nil());
        cb.on_stage_complete(4, 100);
    }
}
