//! Progress-callback trait for per-image rehost events.
//!
//! Inject an [`Arc<dyn RehostProgressCallback>`] via
//! [`crate::config::RehostConfigBuilder::progress_callback`] to receive
//! events as the batch rewriter settles each image reference.
//!
//! The trait is `Send + Sync` because multi-image batches settle their
//! references from tasks spawned on the tokio worker pool.
//!
//! # Example
//!
//! ```rust
//! use imgrehost::{RehostConfig, RehostProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl RehostProgressCallback for CountingCallback {
//!     fn on_image_failed(&self, _index: usize, _total: usize, url: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("could not rehost {url}");
//!     }
//! }
//!
//! let config = RehostConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { failed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch rewriter as it processes each image reference.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Indices are 0-based positions in extraction order.
///
/// # Thread safety
///
/// For multi-image content `on_image_complete` and `on_image_failed` may be
/// called concurrently from different worker threads.
pub trait RehostProgressCallback: Send + Sync {
    /// Called once after extraction, before any rehost starts.
    fn on_rewrite_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when a reference resolved to a hosted (or passed-through) URL.
    fn on_image_complete(&self, index: usize, total_images: usize, final_url: &str) {
        let _ = (index, total_images, final_url);
    }

    /// Called when a reference could not be re-hosted and will carry a
    /// failure-marked URL.
    fn on_image_failed(&self, index: usize, total_images: usize, url: &str) {
        let _ = (index, total_images, url);
    }

    /// Called once per reference abandoned at the batch deadline.
    fn on_image_timeout(&self, index: usize, total_images: usize, url: &str) {
        let _ = (index, total_images, url);
    }

    /// Called once after substitution.
    fn on_rewrite_complete(&self, total_images: usize, rehosted: usize) {
        let _ = (total_images, rehosted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RehostProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RehostConfig`].
pub type ProgressCallback = Arc<dyn RehostProgressCallback>;
