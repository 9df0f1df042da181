//! The image service: one handle over cache, rehoster and collaborators.
//!
//! [`ImageService`] is cheap to clone and shares its cache between clones,
//! so a single instance can serve every request of a process. The batch
//! rewriter lives in [`crate::rewrite`] as further `impl ImageService`
//! methods.

use crate::cache::RehostCache;
use crate::config::RehostConfig;
use crate::error::{ImageError, RehostError};
use crate::markdown::failure_url;
use crate::moderation::{audit_text_or_pass, ModerationService, Verdict};
use crate::output::ImageStatus;
use crate::pipeline::classify::{classify, FileType};
use crate::pipeline::fetch::{HttpFetcher, ImageFetcher};
use crate::pipeline::rehost::ImageRehoster;
use crate::pipeline::upload::UploadSink;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An image submitted directly by a client.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    /// MIME type declared by the client. Only a hint.
    pub content_type: String,
}

impl UploadedImage {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// How one external URL was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolution {
    pub final_url: String,
    pub status: ImageStatus,
}

impl Resolution {
    pub(crate) fn failed(url: &str) -> Self {
        Self {
            final_url: failure_url(url),
            status: ImageStatus::Failed,
        }
    }
}

/// Re-hosts external images, accepts direct uploads, and rewrites Markdown.
#[derive(Clone)]
pub struct ImageService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: RehostConfig,
    cache: RehostCache,
    rehoster: ImageRehoster,
    moderation: Option<Arc<dyn ModerationService>>,
}

impl ImageService {
    /// Start building a service around `config`.
    pub fn builder(config: RehostConfig) -> ImageServiceBuilder {
        ImageServiceBuilder {
            config,
            fetcher: None,
            sink: None,
            moderation: None,
        }
    }

    pub fn config(&self) -> &RehostConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &RehostCache {
        &self.inner.cache
    }

    /// Live handles to this service, including those held by batch tasks.
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn sink(&self) -> &Arc<dyn UploadSink> {
        self.inner.rehoster.sink()
    }

    /// Re-host one external image URL.
    ///
    /// Canonical URLs (see [`UploadSink::upload_ignore`]) come back
    /// unchanged. Otherwise the result is the hosted URL, or the
    /// failure-marked source URL if re-hosting failed now or within the
    /// cache TTL. Never fails.
    pub async fn save_external(&self, url: &str) -> String {
        self.resolve(url).await.final_url
    }

    pub(crate) async fn resolve(&self, url: &str) -> Resolution {
        if self.sink().upload_ignore(url) {
            debug!("Passing through canonical image URL: {}", url);
            return Resolution {
                final_url: url.to_string(),
                status: ImageStatus::PassedThrough,
            };
        }

        let rehoster = self.inner.rehoster.clone();
        let key = url.to_string();
        let hosted = self
            .inner
            .cache
            .get_with(url, move || async move { rehoster.rehost(&key).await })
            .await;

        if hosted.is_empty() {
            Resolution::failed(url)
        } else {
            Resolution {
                final_url: hosted,
                status: ImageStatus::Rehosted,
            }
        }
    }

    /// Store an image uploaded directly by a client.
    ///
    /// Unlike [`save_external`](Self::save_external), failures here are the
    /// client's to see: a missing file, a non-static format and a moderation
    /// rejection are all reported as client errors
    /// ([`RehostError::is_client_error`]).
    pub async fn save_upload(&self, upload: Option<UploadedImage>) -> Result<String, RehostError> {
        let upload = match upload {
            Some(u) if !u.bytes.is_empty() => u,
            _ => return Err(RehostError::MissingImage),
        };

        let hint = FileType::from_mime(&upload.content_type);
        let file_type = classify(&upload.bytes, hint).map_err(|e| {
            warn!("Refusing upload declared as '{}': {}", upload.content_type, e);
            RehostError::UnsupportedImage {
                content_type: upload.content_type.clone(),
            }
        })?;

        let size = upload.bytes.len();
        let hosted = self
            .sink()
            .upload(upload.bytes, file_type)
            .await
            .map_err(|source| RehostError::UploadFailed { source })?;

        self.inner.rehoster.screen(&hosted).await.map_err(|e| match e {
            ImageError::Rejected { reason } => RehostError::Rejected { reason },
            other => RehostError::Internal(other.to_string()),
        })?;

        info!("Stored {} upload ({} bytes) as {}", file_type, size, hosted);
        Ok(hosted)
    }

    /// Audit article text. Passes when no moderation service is configured
    /// or when it cannot be reached.
    pub async fn audit_text(&self, text: &str) -> Verdict {
        match &self.inner.moderation {
            Some(m) => audit_text_or_pass(m.as_ref(), text).await,
            None => Verdict::Pass,
        }
    }
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .field("rehoster", &self.inner.rehoster)
            .finish()
    }
}

/// Builder for [`ImageService`].
pub struct ImageServiceBuilder {
    config: RehostConfig,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    sink: Option<Arc<dyn UploadSink>>,
    moderation: Option<Arc<dyn ModerationService>>,
}

impl ImageServiceBuilder {
    /// Override the HTTP fetcher built from the config.
    pub fn fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Where re-hosted and uploaded images are stored. Required.
    pub fn sink(mut self, sink: Arc<dyn UploadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn moderation(mut self, moderation: Arc<dyn ModerationService>) -> Self {
        self.moderation = Some(moderation);
        self
    }

    pub fn build(self) -> Result<ImageService, RehostError> {
        let sink = self
            .sink
            .ok_or_else(|| RehostError::InvalidConfig("An upload sink is required".into()))?;
        let fetcher: Arc<dyn ImageFetcher> = match self.fetcher {
            Some(f) => f,
            None => Arc::new(
                HttpFetcher::new(&self.config).map_err(|e| RehostError::Internal(e.to_string()))?,
            ),
        };

        let mut rehoster = ImageRehoster::new(fetcher, sink);
        if self.config.audit_images {
            if let Some(m) = &self.moderation {
                rehoster = rehoster.with_moderation(Arc::clone(m));
            }
        }

        let cache = RehostCache::new(self.config.cache_capacity, self.config.cache_ttl());
        Ok(ImageService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                cache,
                rehoster,
                moderation: self.moderation,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ModerationError, UploadError};
    use crate::pipeline::classify::fixtures::{JPEG, PNG, SVG};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(FetchError::Status {
                    url: url.into(),
                    status: 502,
                });
            }
            Ok(Bytes::from_static(PNG))
        }
    }

    struct HostSink;

    #[async_trait]
    impl UploadSink for HostSink {
        async fn upload(&self, _bytes: Bytes, file_type: FileType) -> Result<String, UploadError> {
            Ok(format!("http://host/x.{}", file_type.extension()))
        }

        fn upload_ignore(&self, url: &str) -> bool {
            url.starts_with("http://host/")
        }
    }

    struct RejectAll;

    #[async_trait]
    impl ModerationService for RejectAll {
        async fn audit_image(&self, _url: &str) -> Result<Verdict, ModerationError> {
            Ok(Verdict::Rejected("Scene: porn, Label: porn".into()))
        }

        async fn audit_text(&self, _text: &str) -> Result<Verdict, ModerationError> {
            Ok(Verdict::Rejected("Suggestion: block".into()))
        }
    }

    fn service(fetcher: Arc<CountingFetcher>) -> ImageService {
        ImageService::builder(RehostConfig::default())
            .fetcher(fetcher)
            .sink(Arc::new(HostSink))
            .build()
            .unwrap()
    }

    fn fetcher() -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn build_without_sink_fails() {
        let err = ImageService::builder(RehostConfig::default()).build().unwrap_err();
        assert!(matches!(err, RehostError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn save_external_is_memoized() {
        let f = fetcher();
        let svc = service(f.clone());
        assert_eq!(svc.save_external("http://ext/1.png").await, "http://host/x.png");
        assert_eq!(svc.save_external("http://ext/1.png").await, "http://host/x.png");
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canonical_urls_skip_the_pipeline() {
        let f = fetcher();
        let svc = service(f.clone());
        assert_eq!(svc.save_external("http://host/y.png").await, "http://host/y.png");
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn failed_rehost_returns_marked_url_and_is_not_retried() {
        let f = fetcher();
        let svc = service(f.clone());
        let first = svc.save_external("http://ext/broken.png").await;
        let second = svc.save_external("http://ext/broken.png").await;
        assert_eq!(first, "http://ext/broken.png?cause=saveError!");
        assert_eq!(first, second);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upload_without_file_is_a_client_error() {
        let svc = service(fetcher());
        let err = svc.save_upload(None).await.unwrap_err();
        assert!(matches!(err, RehostError::MissingImage));
        assert!(err.is_client_error());

        let empty = UploadedImage::new(Bytes::new(), "image/png");
        assert!(matches!(
            svc.save_upload(Some(empty)).await,
            Err(RehostError::MissingImage)
        ));
    }

    #[tokio::test]
    async fn upload_of_svg_is_refused() {
        let svc = service(fetcher());
        let err = svc
            .save_upload(Some(UploadedImage::new(Bytes::from_static(SVG), "image/png")))
            .await
            .unwrap_err();
        assert!(matches!(err, RehostError::UnsupportedImage { .. }));
    }

    #[tokio::test]
    async fn upload_with_jpg_alias_is_stored() {
        let svc = service(fetcher());
        let url = svc
            .save_upload(Some(UploadedImage::new(Bytes::from_static(JPEG), "image/jpg")))
            .await
            .unwrap();
        assert_eq!(url, "http://host/x.jpg");
    }

    #[tokio::test]
    async fn moderated_upload_rejection_propagates() {
        let svc = ImageService::builder(RehostConfig::default())
            .fetcher(fetcher())
            .sink(Arc::new(HostSink))
            .moderation(Arc::new(RejectAll))
            .build()
            .unwrap();
        let err = svc
            .save_upload(Some(UploadedImage::new(Bytes::from_static(PNG), "image/png")))
            .await
            .unwrap_err();
        assert!(matches!(err, RehostError::Rejected { .. }));
        assert!(matches!(svc.audit_text("spam spam").await, Verdict::Rejected(_)));
    }

    #[tokio::test]
    async fn audit_images_off_skips_image_moderation() {
        let svc = ImageService::builder(RehostConfig::builder().audit_images(false).build().unwrap())
            .fetcher(fetcher())
            .sink(Arc::new(HostSink))
            .moderation(Arc::new(RejectAll))
            .build()
            .unwrap();
        assert_eq!(svc.save_external("http://ext/1.png").await, "http://host/x.png");
    }

    #[tokio::test]
    async fn audit_text_without_service_passes() {
        let svc = service(fetcher());
        assert!(svc.audit_text("anything").await.is_pass());
    }
}
