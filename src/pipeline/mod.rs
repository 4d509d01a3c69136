//! Transformation steps between the container and the persisted book.
//!
//! Each submodule implements exactly one step. Keeping steps separate makes
//! each independently testable and lets us swap implementations (e.g. a
//! different markup normaliser) without touching other steps.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ container ──▶ normalize ──▶ segment ──▶ persist
//! (path/URL)  (zip+OPF)    (Markdown)    (blocks)   (gateway)
//!                   └────▶ resources ──▶ object store
//! ```
//!
//! 1. [`input`]     — canonicalise a user-supplied path or URL to container
//!    bytes, validating the zip magic before anything opens it
//! 2. [`normalize`] — convert one chapter's markup to deterministic Markdown
//! 3. [`segment`]   — split one chapter's Markdown into typed content
//!    blocks; pure, no I/O
//! 4. [`resources`] — resolve manifest image entries against the container
//!    with path-variant fallbacks and rehome their bytes to the object store

pub mod input;
pub mod normalize;
pub mod resources;
pub mod segment;
