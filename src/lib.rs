//! # imgrehost
//!
//! Re-host the external images of user-authored Markdown onto your own
//! storage before publishing.
//!
//! ## Why this crate?
//!
//! Hot-linked images rot, leak reader traffic to third parties, and can be
//! swapped for something else after moderation has looked at them. This
//! crate finds every `![caption](url)` in a document, copies each external
//! image into an object store you control, and rewrites the document to
//! point at the stored copies, all within a bounded time so publishing is
//! never held up by a slow image host.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Extract   find image references in document order
//!  ├─ 2. Cache     one rehost per URL, failures remembered for the TTL
//!  ├─ 3. Fetch     HTTP GET with timeout and size cap
//!  ├─ 4. Classify  magic-byte check: png / jpg / webp / gif only
//!  ├─ 5. Upload    content-addressed object, canonical URL back
//!  ├─ 6. Audit     optional moderation, fail-open
//!  └─ 7. Rewrite   substitute hosted or failure-marked URLs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgrehost::{ImageService, LocalDirSink, RehostConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = LocalDirSink::new("/var/www/img", "https://img.example.com");
//!     let service = ImageService::builder(RehostConfig::default())
//!         .sink(Arc::new(sink))
//!         .build()?;
//!
//!     let article = "Hello ![logo](https://elsewhere.example.org/logo.png)";
//!     let published = service.rewrite_for_publish(article).await;
//!     println!("{published}");
//!     println!("{}", service.cache().stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgrehost` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! imgrehost = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod markdown;
pub mod moderation;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod rewrite;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheStats, RehostCache};
pub use config::{RehostConfig, RehostConfigBuilder};
pub use error::{FetchError, ImageError, ModerationError, RehostError, UploadError};
pub use markdown::{extract_image_refs, failure_url, is_failure_url, ImageRef, FAILURE_MARKER};
pub use moderation::{ModerationService, Verdict};
pub use output::{ImageOutcome, ImageStatus, RewriteOutput, RewriteStats};
pub use pipeline::classify::FileType;
pub use pipeline::fetch::{HttpFetcher, ImageFetcher};
pub use pipeline::rehost::ImageRehoster;
pub use pipeline::upload::{LocalDirSink, UploadSink};
pub use progress::{NoopProgressCallback, ProgressCallback, RehostProgressCallback};
pub use service::{ImageService, ImageServiceBuilder, UploadedImage};
