//! Media fetch collaborator seam.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Delivers the raw (still encrypted) bytes behind a media reference.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches media already present on the local filesystem.
///
/// Accepts plain paths and `file://` URLs. Relative paths resolve against
/// `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    /// Fetcher resolving paths as given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher resolving relative paths against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        if url.contains("://") && !url.starts_with("file://") {
            return Err(Error::Download(format!(
                "unsupported scheme in {}",
                url.split("://").next().unwrap_or_default()
            )));
        }
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        })
    }
}

#[async_trait]
impl MediaFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.resolve(url)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Download(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_paths() {
        let fetcher = FileFetcher::with_root("/cache");
        assert_eq!(
            fetcher.resolve("file:///tmp/a.bin").expect("resolve"),
            PathBuf::from("/tmp/a.bin")
        );
        assert_eq!(
            fetcher.resolve("img/b.bin").expect("resolve"),
            PathBuf::from("/cache/img/b.bin")
        );
        assert!(matches!(
            fetcher.resolve("https://example.com/x"),
            Err(Error::Download(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_download_error() {
        let err = FileFetcher::new()
            .fetch("/nonexistent/media.bin")
            .await
            .expect_err("missing");
        assert!(matches!(err, Error::Download(_)));
    }
}
