//! Upload sinks: where re-hosted bytes end up.
//!
//! The object store itself is a collaborator. [`UploadSink`] is the contract
//! the pipeline needs from it; [`LocalDirSink`] is a filesystem-backed
//! implementation used by the CLI and tests, serving files under a public
//! base URL.

use crate::error::UploadError;
use crate::pipeline::classify::FileType;
use crate::pipeline::fetch::is_url;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable storage for image bytes.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Store `bytes` and return the public URL of the stored copy.
    async fn upload(&self, bytes: Bytes, file_type: FileType) -> Result<String, UploadError>;

    /// True when `url` is already canonical (hosted by this sink, or not an
    /// HTTP image at all) and must be passed through untouched.
    fn upload_ignore(&self, url: &str) -> bool;
}

/// Stores images in a local directory, named by the SHA-256 of their
/// content, and hands out `{public_base}/{hash}.{ext}` URLs.
///
/// Content addressing makes repeated uploads of the same bytes converge on
/// one object.
#[derive(Debug, Clone)]
pub struct LocalDirSink {
    root: PathBuf,
    public_base: String,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        let public_base = public_base.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            public_base,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_base(&self) -> &str {
        &self.public_base
    }

    fn object_name(bytes: &[u8], file_type: FileType) -> String {
        let digest = Sha256::digest(bytes);
        format!("{}.{}", hex::encode(digest), file_type.extension())
    }
}

#[async_trait]
impl UploadSink for LocalDirSink {
    async fn upload(&self, bytes: Bytes, file_type: FileType) -> Result<String, UploadError> {
        let name = Self::object_name(&bytes, file_type);
        let path = self.root.join(&name);

        let size = bytes.len();
        write_atomic(&path, bytes)
            .await
            .map_err(|e| UploadError::Io {
                path: path.clone(),
                source: e,
            })?;

        debug!("Stored {} bytes as {}", size, path.display());
        Ok(format!("{}/{}", self.public_base, name))
    }

    fn upload_ignore(&self, url: &str) -> bool {
        !is_url(url) || url.starts_with(&format!("{}/", self.public_base))
    }
}

/// Write `bytes` to `path` through a uniquely named temp file in the same
/// directory, creating the directory if needed.
///
/// Readers only ever see a complete file, and concurrent writers of the same
/// path each persist their own temp file. A failed write removes its temp
/// file.
pub(crate) async fn write_atomic(path: &Path, bytes: Bytes) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::fixtures::PNG;
    use std::sync::Arc;

    #[tokio::test]
    async fn upload_writes_content_addressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalDirSink::new(dir.path(), "https://img.example.com/");

        let url = sink
            .upload(Bytes::from_static(PNG), FileType::Png)
            .await
            .unwrap();

        assert!(url.starts_with("https://img.example.com/"), "got: {url}");
        assert!(url.ends_with(".png"));
        let name = url.rsplit('/').next().unwrap();
        let stored = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(stored, PNG);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn same_bytes_same_url() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalDirSink::new(dir.path(), "https://img.example.com");
        let a = sink.upload(Bytes::from_static(PNG), FileType::Png).await.unwrap();
        let b = sink.upload(Bytes::from_static(PNG), FileType::Png).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_of_identical_bytes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LocalDirSink::new(dir.path(), "https://img.example.com"));
        let mut payload = PNG.to_vec();
        payload.resize(PNG.len() + 256 * 1024, 0xAB);
        let payload = Bytes::from(payload);

        for _ in 0..10 {
            let uploads: Vec<_> = (0..8)
                .map(|_| {
                    let sink = Arc::clone(&sink);
                    let bytes = payload.clone();
                    tokio::spawn(async move { sink.upload(bytes, FileType::Png).await })
                })
                .collect();
            let mut urls = Vec::new();
            for handle in uploads {
                urls.push(handle.await.unwrap().expect("upload failed"));
            }
            urls.dedup();
            assert_eq!(urls.len(), 1, "got: {urls:?}");
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "leftover temp files");
        let name = entries[0].as_ref().unwrap().file_name();
        assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), &payload[..]);
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.md");
        write_atomic(&path, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn ignores_own_and_non_http_urls() {
        let sink = LocalDirSink::new("/tmp/unused", "https://img.example.com");
        assert!(sink.upload_ignore("https://img.example.com/abc.png"));
        assert!(sink.upload_ignore("/static/logo.png"));
        assert!(sink.upload_ignore("data:image/png;base64,AAAA"));
        assert!(!sink.upload_ignore("https://img.example.com.evil.net/abc.png"));
        assert!(!sink.upload_ignore("http://ext/1.png"));
    }
}
