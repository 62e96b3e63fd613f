use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KakeraResult;

/// Progress of a partial download, stored beside the `.part` file.
///
/// ```json
/// {"downloader":{"current_fragment":{"index":3},"fragment_count":10,"downloaded_bytes":3072}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub downloader: DownloaderState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderState {
    pub current_fragment: CurrentFragment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_count: Option<u64>,
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// Fragments counted in `current_fragment` that were skipped.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped_fragments: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentFragment {
    /// Number of fragments already written.
    pub index: u64,
}

impl ResumeState {
    pub fn new(fragment_count: Option<u64>) -> Self {
        Self {
            downloader: DownloaderState {
                fragment_count,
                ..Default::default()
            },
        }
    }

    pub fn fragments(&self) -> u64 {
        self.downloader.current_fragment.index
    }

    pub fn bytes(&self) -> u64 {
        self.downloader.downloaded_bytes
    }

    pub fn skipped(&self) -> u64 {
        self.downloader.skipped_fragments
    }

    pub fn skip(&mut self, fragment: u64) {
        self.downloader.current_fragment.index = fragment;
        self.downloader.skipped_fragments += 1;
    }

    pub fn advance(&mut self, fragment: u64, bytes: u64) {
        self.downloader.current_fragment.index = fragment;
        self.downloader.downloaded_bytes = bytes;
    }

    /// `Ok(None)` when there is no state file.
    pub async fn load(path: impl AsRef<Path>) -> KakeraResult<Option<Self>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> KakeraResult<()> {
        tokio::fs::write(path, serde_json::to_vec(self)?).await?;
        Ok(())
    }

    pub async fn remove(path: impl AsRef<Path>) -> KakeraResult<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
