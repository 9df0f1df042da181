//! Configuration types for image re-hosting.
//!
//! All rehost behaviour is controlled through [`RehostConfig`], built via its
//! [`RehostConfigBuilder`]. Keeping every knob in one struct makes it easy to
//! share one config between the cache, the rehoster and the batch rewriter,
//! and to log the effective settings at startup.

use crate::error::RehostError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;

/// Configuration for an [`crate::service::ImageService`].
///
/// Built via [`RehostConfig::builder()`] or using [`RehostConfig::default()`].
///
/// # Example
/// ```rust
/// use imgrehost::RehostConfig;
///
/// let config = RehostConfig::builder()
///     .cache_capacity(500)
///     .batch_budget_ms(2000)
///     .build()
///     .unwrap();
/// assert_eq!(config.cache_capacity, 500);
/// ```
#[derive(Clone)]
pub struct RehostConfig {
    /// Maximum number of memoized `source URL → hosted URL` entries. Default: 300.
    ///
    /// Once exceeded the least-recently-used entry is evicted.
    pub cache_capacity: usize,

    /// Time-to-live of a cache entry, measured from when it was written. Default: 300 s.
    ///
    /// Failed rehosts are cached too (as the empty string), so a known-bad
    /// URL is retried at most once per TTL window.
    pub cache_ttl_secs: u64,

    /// How long the concurrent batch waits for its rehosts, in milliseconds. Default: 3000.
    ///
    /// References still pending when the budget runs out are abandoned and
    /// substituted with a failure-marked URL.
    pub batch_budget_ms: u64,

    /// Caller-level deadline for [`crate::service::ImageService::rewrite_for_publish`],
    /// in milliseconds. Default: 5000.
    ///
    /// When breached, the content is returned exactly as submitted. A deadline
    /// shorter than `batch_budget_ms` cuts the batch short.
    pub publish_deadline_ms: u64,

    /// Rehost a lone reference inline instead of spawning a task. Default: true.
    pub single_image_fast_path: bool,

    /// Per-image HTTP timeout in seconds. Default: 10.
    pub fetch_timeout_secs: u64,

    /// Largest image body accepted from an external host. Default: 20 MiB.
    pub max_image_bytes: usize,

    /// Audit re-hosted images when a moderation service is configured. Default: true.
    pub audit_images: bool,

    /// Optional per-image event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RehostConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 300,
            cache_ttl_secs: 300,
            batch_budget_ms: 3000,
            publish_deadline_ms: 5000,
            single_image_fast_path: true,
            fetch_timeout_secs: 10,
            max_image_bytes: 20 * 1024 * 1024,
            audit_images: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RehostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RehostConfig")
            .field("cache_capacity", &self.cache_capacity)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("batch_budget_ms", &self.batch_budget_ms)
            .field("publish_deadline_ms", &self.publish_deadline_ms)
            .field("single_image_fast_path", &self.single_image_fast_path)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("audit_images", &self.audit_images)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RehostProgressCallback>"),
            )
            .finish()
    }
}

impl RehostConfig {
    /// Create a new builder for `RehostConfig`.
    pub fn builder() -> RehostConfigBuilder {
        RehostConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_millis(self.batch_budget_ms)
    }

    pub fn publish_deadline(&self) -> Duration {
        Duration::from_millis(self.publish_deadline_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Builder for [`RehostConfig`].
#[derive(Debug)]
pub struct RehostConfigBuilder {
    config: RehostConfig,
}

impl RehostConfigBuilder {
    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.config.cache_capacity = n;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn batch_budget_ms(mut self, ms: u64) -> Self {
        self.config.batch_budget_ms = ms;
        self
    }

    pub fn publish_deadline_ms(mut self, ms: u64) -> Self {
        self.config.publish_deadline_ms = ms;
        self
    }

    pub fn single_image_fast_path(mut self, v: bool) -> Self {
        self.config.single_image_fast_path = v;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn audit_images(mut self, v: bool) -> Self {
        self.config.audit_images = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RehostConfig, RehostError> {
        let c = &self.config;
        if c.cache_capacity == 0 {
            return Err(RehostError::InvalidConfig(
                "Cache capacity must be ≥ 1".into(),
            ));
        }
        if c.cache_ttl_secs == 0 {
            return Err(RehostError::InvalidConfig("Cache TTL must be ≥ 1s".into()));
        }
        if c.batch_budget_ms == 0 {
            return Err(RehostError::InvalidConfig(
                "Batch budget must be ≥ 1ms".into(),
            ));
        }
        if c.publish_deadline_ms == 0 {
            return Err(RehostError::InvalidConfig(
                "Publish deadline must be ≥ 1ms".into(),
            ));
        }
        if c.max_image_bytes == 0 {
            return Err(RehostError::InvalidConfig(
                "Image size limit must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cache_policy() {
        let c = RehostConfig::default();
        assert_eq!(c.cache_capacity, 300);
        assert_eq!(c.cache_ttl(), Duration::from_secs(300));
        assert!(c.single_image_fast_path);
        assert!(c.batch_budget() <= c.publish_deadline());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = RehostConfig::builder().cache_capacity(0).build().unwrap_err();
        assert!(matches!(err, RehostError::InvalidConfig(_)));
    }

    #[test]
    fn deadline_shorter_than_budget_is_accepted() {
        let c = RehostConfig::builder()
            .batch_budget_ms(4000)
            .publish_deadline_ms(1000)
            .build()
            .unwrap();
        assert!(c.publish_deadline() < c.batch_budget());
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let err = RehostConfig::builder()
            .publish_deadline_ms(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Publish deadline"), "got: {err}");
    }

    #[test]
    fn fetch_timeout_is_clamped() {
        let c = RehostConfig::builder().fetch_timeout_secs(0).build().unwrap();
        assert_eq!(c.fetch_timeout_secs, 1);
    }

    #[test]
    fn debug_hides_callback() {
        let c = RehostConfig::default();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("cache_capacity: 300"));
        assert!(dbg.contains("progress_callback: None"));
    }
}
