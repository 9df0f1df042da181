//! Result types returned by the batch rewriter.

use crate::error::RehostError;
use crate::markdown::ImageRef;
use crate::pipeline::upload::write_atomic;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How one image reference was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Fetched, stored and now points at the hosted copy.
    Rehosted,
    /// Already canonical (own host or not an HTTP URL); left as-is.
    PassedThrough,
    /// Fetch, classification, upload or moderation failed.
    Failed,
    /// Abandoned at the batch deadline.
    TimedOut,
}

impl ImageStatus {
    /// True when the final URL carries the failure marker.
    pub fn is_failure(self) -> bool {
        matches!(self, ImageStatus::Failed | ImageStatus::TimedOut)
    }
}

/// Per-reference outcome, in extraction order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutcome {
    /// 0-based position in extraction order.
    pub index: usize,
    pub image: ImageRef,
    /// URL written into the rewritten content.
    pub final_url: String,
    pub status: ImageStatus,
}

/// Aggregate counters for one rewrite call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStats {
    pub total_images: usize,
    pub rehosted: usize,
    pub passed_through: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub duration_ms: u64,
    /// The publish deadline fired and the content was returned as submitted.
    #[serde(default)]
    pub deadline_exceeded: bool,
}

impl RewriteStats {
    pub(crate) fn from_outcomes(outcomes: &[ImageOutcome], duration_ms: u64) -> Self {
        let count = |s: ImageStatus| outcomes.iter().filter(|o| o.status == s).count();
        Self {
            total_images: outcomes.len(),
            rehosted: count(ImageStatus::Rehosted),
            passed_through: count(ImageStatus::PassedThrough),
            failed: count(ImageStatus::Failed),
            timed_out: count(ImageStatus::TimedOut),
            duration_ms,
            deadline_exceeded: false,
        }
    }
}

/// Rewritten content plus what happened to each image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteOutput {
    pub content: String,
    pub images: Vec<ImageOutcome>,
    pub stats: RewriteStats,
}

impl RewriteOutput {
    /// Output for content with nothing to rewrite.
    pub(crate) fn unchanged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            images: Vec::new(),
            stats: RewriteStats::default(),
        }
    }

    /// Output for content whose rewrite overran the publish deadline.
    pub(crate) fn deadline_exceeded(content: &str, duration_ms: u64) -> Self {
        let mut out = Self::unchanged(content);
        out.stats.duration_ms = duration_ms;
        out.stats.deadline_exceeded = true;
        out
    }

    /// Write the rewritten content to `path`, creating parent directories.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<(), RehostError> {
        let path = path.as_ref();
        write_atomic(path, Bytes::from(self.content.clone()))
            .await
            .map_err(|e| RehostError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Pretty JSON report (content omitted), as printed by `imgrehost --json`.
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&serde_json::json!({
            "images": self.images,
            "stats": self.stats,
        }))
    }
}
