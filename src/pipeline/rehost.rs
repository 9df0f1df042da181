//! Single-image rehost: fetch → classify → upload → (optional) audit.
//!
//! ## Return Value
//!
//! [`ImageRehoster::rehost`] always returns a `String` and never propagates
//! an error upward, so one bad external image never aborts the rewrite of
//! the whole document. The empty string is the failure sentinel; the batch
//! rewriter turns it into a failure-marked URL.

use crate::error::ImageError;
use crate::moderation::{audit_image_or_pass, ModerationService, Verdict};
use crate::pipeline::classify::{classify, extension_hint, FileType};
use crate::pipeline::fetch::ImageFetcher;
use crate::pipeline::upload::UploadSink;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Re-hosts one external image through the configured collaborators.
#[derive(Clone)]
pub struct ImageRehoster {
    fetcher: Arc<dyn ImageFetcher>,
    sink: Arc<dyn UploadSink>,
    moderation: Option<Arc<dyn ModerationService>>,
}

impl ImageRehoster {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, sink: Arc<dyn UploadSink>) -> Self {
        Self {
            fetcher,
            sink,
            moderation: None,
        }
    }

    /// Audit every re-hosted copy with `moderation`.
    pub fn with_moderation(mut self, moderation: Arc<dyn ModerationService>) -> Self {
        self.moderation = Some(moderation);
        self
    }

    pub fn sink(&self) -> &Arc<dyn UploadSink> {
        &self.sink
    }

    /// Re-host `url`, returning the hosted URL or `""` on any failure.
    pub async fn rehost(&self, url: &str) -> String {
        let start = Instant::now();
        match self.try_rehost(url).await {
            Ok(hosted) => {
                debug!("Re-hosted {} → {} in {:?}", url, hosted, start.elapsed());
                hosted
            }
            Err(e) => {
                error!("Failed to re-host external image {}: {}", url, e);
                String::new()
            }
        }
    }

    /// Same as [`rehost`](Self::rehost) but reports why it failed.
    pub async fn try_rehost(&self, url: &str) -> Result<String, ImageError> {
        let hint = extension_hint(url).and_then(|ext| FileType::from_extension(&ext));
        let bytes = self.fetcher.fetch(url).await?;
        let file_type = classify(&bytes, hint)?;
        let hosted = self.sink.upload(bytes, file_type).await?;
        self.screen(&hosted).await?;
        Ok(hosted)
    }

    /// Run the stored copy past moderation, if configured. An unreachable
    /// moderation service counts as a pass.
    pub(crate) async fn screen(&self, hosted: &str) -> Result<(), ImageError> {
        let Some(moderation) = &self.moderation else {
            return Ok(());
        };
        match audit_image_or_pass(moderation.as_ref(), hosted).await {
            Verdict::Pass => Ok(()),
            Verdict::Rejected(reason) => {
                warn!("Moderation rejected {}: {}", hosted, reason);
                Err(ImageError::Rejected { reason })
            }
        }
    }
}

impl std::fmt::Debug for ImageRehoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRehoster")
            .field("moderation", &self.moderation.as_ref().map(|_| "<dyn ModerationService>"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ModerationError, UploadError};
    use crate::pipeline::classify::fixtures::{PNG, SVG};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    struct StaticFetcher(Result<&'static [u8], FetchError>);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            self.0.clone().map(Bytes::from_static)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: Mutex<Vec<FileType>>,
        fail: bool,
    }

    #[async_trait]
    impl UploadSink for RecordingSink {
        async fn upload(&self, _bytes: Bytes, file_type: FileType) -> Result<String, UploadError> {
            if self.fail {
                return Err(UploadError::Rejected("bucket full".into()));
            }
            self.stored.lock().push(file_type);
            Ok(format!("http://host/x.{}", file_type.extension()))
        }

        fn upload_ignore(&self, _url: &str) -> bool {
            false
        }
    }

    struct FixedVerdict(Result<Verdict, ModerationError>);

    #[async_trait]
    impl ModerationService for FixedVerdict {
        async fn audit_image(&self, _url: &str) -> Result<Verdict, ModerationError> {
            self.0.clone()
        }

        async fn audit_text(&self, _text: &str) -> Result<Verdict, ModerationError> {
            self.0.clone()
        }
    }

    fn rehoster(bytes: Result<&'static [u8], FetchError>, sink: Arc<RecordingSink>) -> ImageRehoster {
        ImageRehoster::new(Arc::new(StaticFetcher(bytes)), sink)
    }

    #[tokio::test]
    async fn rehosts_png() {
        let sink = Arc::new(RecordingSink::default());
        let r = rehoster(Ok(PNG), sink.clone());
        assert_eq!(r.rehost("http://ext/1.png").await, "http://host/x.png");
        assert_eq!(*sink.stored.lock(), vec![FileType::Png]);
    }

    #[tokio::test]
    async fn svg_never_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let r = rehoster(Ok(SVG), sink.clone());
        assert_eq!(r.rehost("http://ext/evil.svg").await, "");
        assert!(matches!(
            r.try_rehost("http://ext/evil.png").await,
            Err(ImageError::UnsupportedFormat { .. })
        ));
        assert!(sink.stored.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_yields_sentinel() {
        let sink = Arc::new(RecordingSink::default());
        let r = rehoster(
            Err(FetchError::Status {
                url: "http://ext/1.png".into(),
                status: 500,
            }),
            sink,
        );
        assert_eq!(r.rehost("http://ext/1.png").await, "");
    }

    #[tokio::test]
    async fn upload_failure_yields_sentinel() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let r = rehoster(Ok(PNG), sink);
        assert_eq!(r.rehost("http://ext/1.png").await, "");
        assert!(matches!(
            r.try_rehost("http://ext/1.png").await,
            Err(ImageError::Upload(_))
        ));
    }

    #[tokio::test]
    async fn moderation_rejection_yields_sentinel() {
        let sink = Arc::new(RecordingSink::default());
        let r = rehoster(Ok(PNG), sink).with_moderation(Arc::new(FixedVerdict(Ok(
            Verdict::Rejected("Scene: porn".into()),
        ))));
        assert_eq!(r.rehost("http://ext/1.png").await, "");
    }

    #[tokio::test]
    async fn moderation_outage_fails_open() {
        let sink = Arc::new(RecordingSink::default());
        let r = rehoster(Ok(PNG), sink).with_moderation(Arc::new(FixedVerdict(Err(
            ModerationError::Unavailable("503".into()),
        ))));
        assert_eq!(r.rehost("http://ext/1.png").await, "http://host/x.png");
    }
}
