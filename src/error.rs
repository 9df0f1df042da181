//! Error types for the imgrehost library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RehostError`] is **fatal**: the call cannot proceed at all (no file
//!   was uploaded, the upload is not a static image, the input file cannot
//!   be read). Returned as `Err(RehostError)` from the public entry points.
//!
//! * [`ImageError`] is **non-fatal**: a single external image could not be
//!   re-hosted (host unreachable, SVG payload, storage hiccup). It never
//!   leaves the rehost boundary; the batch rewriter substitutes a
//!   failure-marked URL and carries on with the rest of the content.
//!
//! Abandoning a rehost at the batch deadline is not an error at all. It
//! shows up as [`crate::output::ImageStatus::TimedOut`] in the outcome list.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the imgrehost library.
#[derive(Debug, Error)]
pub enum RehostError {
    // ── Client-facing rejections ──────────────────────────────────────────
    /// The upload request carried no image.
    #[error("No image was provided for upload")]
    MissingImage,

    /// The uploaded file is not one of the accepted static image formats.
    #[error("Unsupported image '{content_type}': only png, jpg, webp and gif are accepted")]
    UnsupportedImage { content_type: String },

    /// The moderation service rejected the uploaded image.
    #[error("Image rejected by moderation: {reason}")]
    Rejected { reason: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The upload sink could not store a directly uploaded image.
    #[error("Failed to store uploaded image: {source}")]
    UploadFailed {
        #[source]
        source: UploadError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read the Markdown input file.
    #[error("Failed to read input file '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the rewritten Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RehostError {
    /// True for errors caused by what the client sent rather than by the
    /// service. HTTP front-ends map these to 4xx responses.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RehostError::MissingImage
                | RehostError::UnsupportedImage { .. }
                | RehostError::Rejected { .. }
        )
    }
}

/// A non-fatal error for a single external image.
///
/// Contained by [`crate::pipeline::rehost::ImageRehoster::rehost`], which
/// logs it and returns the empty-string sentinel instead.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The source bytes could not be retrieved.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Magic-number classification did not match an allowed static type.
    #[error("Unsupported image format (detected: {})", detected.as_deref().unwrap_or("unknown"))]
    UnsupportedFormat { detected: Option<String> },

    /// The upload sink failed to store the bytes.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The moderation service rejected the re-hosted copy.
    #[error("Image rejected by moderation: {reason}")]
    Rejected { reason: String },
}

/// Failure while retrieving the bytes of an external image.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be parsed or is not HTTP/HTTPS.
    #[error("Invalid image URL '{url}'")]
    InvalidUrl { url: String },

    /// The remote host answered with a non-success status.
    #[error("Fetching '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The request did not finish within the fetch timeout.
    #[error("Fetching '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Connection, TLS or body-read failure.
    #[error("Fetching '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The body exceeded the configured size cap.
    #[error("Image at '{url}' exceeds the {limit}-byte limit")]
    TooLarge { url: String, limit: usize },

    /// The remote host returned an empty body.
    #[error("Image at '{url}' is empty")]
    Empty { url: String },
}

/// Failure reported by an [`crate::pipeline::upload::UploadSink`].
#[derive(Debug, Error)]
pub enum UploadError {
    /// Writing the object to its backing store failed.
    #[error("Storage I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sink refused the object.
    #[error("Upload rejected: {0}")]
    Rejected(String),
}

/// The moderation service could not be reached or answered garbage.
///
/// Never surfaced to callers: see [`crate::moderation`] for the fail-open
/// policy.
#[derive(Debug, Clone, Error)]
pub enum ModerationError {
    #[error("Moderation service unavailable: {0}")]
    Unavailable(String),
}
