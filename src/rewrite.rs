//! Batch content rewriter.
//!
//! Rewrites every Markdown image reference in a document so it points at a
//! hosted copy.
//!
//! ## Strategy
//!
//! ```text
//! extract ──▶ 0 refs ──▶ return content untouched
//!         ├─▶ 1 ref  ──▶ resolve inline (bounded by the batch budget)
//!         └─▶ N refs ──▶ spawn one task per ref ──▶ collect until deadline
//!                                                    │
//!                           substitute in extraction order ◀┘
//! ```
//!
//! The concurrent branch never lets one slow host hold the document hostage:
//! when the budget runs out the pending tasks are cancelled and their
//! references get a failure-marked URL. The rehosts themselves keep running
//! inside the cache and will serve the next request for the same URL.
//!
//! ## Why substitute by markup?
//!
//! Each reference is replaced by literal match on its full original markup,
//! so identical markup appearing twice is rewritten everywhere on the first
//! pass and the later pass is a no-op. References whose URL did not change
//! are left byte-for-byte as written, which makes rewriting idempotent once
//! every image is hosted.

use crate::error::RehostError;
use crate::markdown::{extract_image_refs, failure_url, image_tag, ImageRef};
use crate::output::{ImageOutcome, ImageStatus, RewriteOutput, RewriteStats};
use crate::progress::ProgressCallback;
use crate::service::{ImageService, Resolution};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl ImageService {
    /// Rewrite every image reference in `content`, waiting at most `budget`
    /// for multi-image batches.
    pub async fn rewrite(&self, content: &str, budget: Duration) -> String {
        self.rewrite_detailed(content, budget).await.content
    }

    /// Like [`rewrite`](Self::rewrite), also reporting what happened to each
    /// reference.
    pub async fn rewrite_detailed(&self, content: &str, budget: Duration) -> RewriteOutput {
        let start = Instant::now();
        let refs = extract_image_refs(content);
        if refs.is_empty() {
            debug!("No image references to rewrite");
            return RewriteOutput::unchanged(content);
        }

        let total = refs.len();
        let cb = self.config().progress_callback.clone();
        if let Some(cb) = &cb {
            cb.on_rewrite_start(total);
        }
        info!("Rewriting {} image reference(s), budget {:?}", total, budget);

        let settled = if total == 1 && self.config().single_image_fast_path {
            vec![self.resolve_inline(&refs[0], budget).await]
        } else {
            self.resolve_concurrent(&refs, budget).await
        };

        let images: Vec<ImageOutcome> = refs
            .into_iter()
            .zip(settled)
            .enumerate()
            .map(|(index, (image, resolution))| {
                let (final_url, status) = match resolution {
                    Some(r) => (r.final_url, r.status),
                    None => {
                        if let Some(cb) = &cb {
                            cb.on_image_timeout(index, total, &image.url);
                        }
                        (failure_url(&image.url), ImageStatus::TimedOut)
                    }
                };
                ImageOutcome {
                    index,
                    image,
                    final_url,
                    status,
                }
            })
            .collect();

        let content = substitute(content, &images);
        let stats = RewriteStats::from_outcomes(&images, start.elapsed().as_millis() as u64);

        if let Some(cb) = &cb {
            cb.on_rewrite_complete(total, stats.rehosted);
        }
        info!(
            "Rewrite finished in {}ms: {} rehosted, {} passed through, {} failed, {} timed out",
            stats.duration_ms, stats.rehosted, stats.passed_through, stats.failed, stats.timed_out
        );

        RewriteOutput {
            content,
            images,
            stats,
        }
    }

    /// Rewrite for publishing, using the configured batch budget and bounded
    /// by the publish deadline.
    ///
    /// If the deadline fires the caller gets `content` back unchanged, so a
    /// slow image host can delay publishing but never block it.
    pub async fn rewrite_for_publish(&self, content: &str) -> String {
        self.rewrite_for_publish_detailed(content).await.content
    }

    /// Like [`rewrite_for_publish`](Self::rewrite_for_publish) with the full
    /// per-image report. `stats.deadline_exceeded` is set when the fallback
    /// was taken.
    pub async fn rewrite_for_publish_detailed(&self, content: &str) -> RewriteOutput {
        let start = Instant::now();
        let deadline = self.config().publish_deadline();
        let budget = self.config().batch_budget();
        match tokio::time::timeout(deadline, self.rewrite_detailed(content, budget)).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    "Image rewrite overran the {:?} publish deadline; publishing content as submitted",
                    deadline
                );
                RewriteOutput::deadline_exceeded(content, start.elapsed().as_millis() as u64)
            }
        }
    }

    /// Rewrite a Markdown file for publishing and write the result to
    /// `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn rewrite_file(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<RewriteOutput, RehostError> {
        let input = input_path.as_ref();
        let content = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| RehostError::InputReadFailed {
                path: input.to_path_buf(),
                source: e,
            })?;

        let output = self.rewrite_for_publish_detailed(&content).await;
        output.write_to(output_path).await?;

        Ok(output)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    async fn resolve_inline(&self, image: &ImageRef, budget: Duration) -> Option<Resolution> {
        match tokio::time::timeout(budget, self.resolve(&image.url)).await {
            Ok(resolution) => {
                notify(self.config().progress_callback.as_ref(), 0, 1, &image.url, &resolution);
                Some(resolution)
            }
            Err(_) => {
                warn!("Image {} not re-hosted within {:?}", image.url, budget);
                None
            }
        }
    }

    /// Resolve every reference concurrently. `None` marks a reference still
    /// pending when the budget ran out.
    async fn resolve_concurrent(&self, refs: &[ImageRef], budget: Duration) -> Vec<Option<Resolution>> {
        let total = refs.len();
        let cancel = CancellationToken::new();
        // Cancels the tasks if this future is dropped before the deadline.
        let _guard = cancel.clone().drop_guard();

        let mut pending: FuturesUnordered<_> = refs
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let service = self.clone();
                let url = image.url.clone();
                let token = cancel.child_token();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => None,
                        resolution = service.resolve(&url) => {
                            notify(
                                service.config().progress_callback.as_ref(),
                                index,
                                total,
                                &url,
                                &resolution,
                            );
                            Some(resolution)
                        }
                    }
                });
                async move { (index, handle.await) }
            })
            .collect();

        let mut settled: Vec<Option<Resolution>> = vec![None; total];
        let deadline = Instant::now() + budget;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, Ok(resolution)))) => settled[index] = resolution,
                Ok(Some((index, Err(e)))) => {
                    error!("Rehost task for image {} aborted: {}", index, e);
                    settled[index] = Some(Resolution::failed(&refs[index].url));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Batch budget of {:?} exhausted with {} of {} image(s) still pending",
                        budget,
                        pending.len(),
                        total
                    );
                    cancel.cancel();
                    break;
                }
            }
        }
        settled
    }
}

fn notify(cb: Option<&ProgressCallback>, index: usize, total: usize, url: &str, resolution: &Resolution) {
    let Some(cb) = cb else { return };
    if resolution.status.is_failure() {
        cb.on_image_failed(index, total, url);
    } else {
        cb.on_image_complete(index, total, &resolution.final_url);
    }
}

/// Replace each reference's markup with a tag pointing at its final URL,
/// in extraction order.
fn substitute(content: &str, images: &[ImageOutcome]) -> String {
    let mut out = content.to_string();
    for outcome in images {
        if outcome.final_url == outcome.image.url {
            continue;
        }
        let tag = image_tag(&outcome.image.caption, &outcome.final_url);
        out = out.replace(&outcome.image.markup, &tag);
    }
    out
}
