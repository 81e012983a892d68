//! File-hosting client abstraction
//!
//! The worker pool never talks to a hosting provider directly; it asks a
//! [`FileHost`] for a fresh download URL at the start of every attempt.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown file id {0}")]
    UnknownFile(i64),

    #[error("host request failed: {0}")]
    Request(String),
}

/// Resolves file ids to URLs the downloader can fetch
#[async_trait]
pub trait FileHost: Send + Sync {
    async fn download_url(&self, file_id: i64) -> Result<String, HostError>;
}

/// Fixed id → URL table
#[derive(Debug, Clone, Default)]
pub struct StaticFileHost {
    urls: HashMap<i64, String>,
}

impl StaticFileHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_id: i64, url: impl Into<String>) {
        self.urls.insert(file_id, url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl FromIterator<(i64, String)> for StaticFileHost {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        Self {
            urls: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FileHost for StaticFileHost {
    async fn download_url(&self, file_id: i64) -> Result<String, HostError> {
        let url = self
            .urls
            .get(&file_id)
            .cloned()
            .ok_or(HostError::UnknownFile(file_id))?;
        tracing::debug!(file_id, url = %url, "Resolved download URL");
        Ok(url)
    }
}
