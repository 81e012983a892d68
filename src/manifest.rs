//! TOML manifest describing the transfers to run
//!
//! ```toml
//! [[transfers]]
//! id = 1
//! name = "Season 1"
//!
//! [[transfers.files]]
//! id = 101
//! name = "s01/e01.mkv"
//! url = "https://cdn.example/e01.mkv"
//! size = "1.2GiB"
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::host::StaticFileHost;
use crate::humanize::ByteSize;
use crate::manager::{FileEntry, TransferRequest};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("file id {0} appears more than once")]
    DuplicateFile(i64),

    #[error("transfer {0} has no files")]
    EmptyTransfer(i64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub transfers: Vec<ManifestTransfer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestTransfer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: ByteSize,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    /// Split into a URL table for the host and one request per transfer.
    pub fn into_parts(self) -> (StaticFileHost, Vec<TransferRequest>) {
        let mut host = StaticFileHost::new();
        let requests = self
            .transfers
            .into_iter()
            .map(|transfer| {
                let files = transfer
                    .files
                    .into_iter()
                    .map(|file| {
                        host.insert(file.id, file.url);
                        FileEntry::builder()
                            .id(file.id)
                            .name(file.name)
                            .size(file.size.as_u64())
                            .build()
                    })
                    .collect();
                TransferRequest::builder()
                    .id(transfer.id)
                    .name(transfer.name)
                    .files(files)
                    .build()
            })
            .collect();
        (host, requests)
    }

    fn check(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for transfer in &self.transfers {
            if transfer.files.is_empty() {
                return Err(ManifestError::EmptyTransfer(transfer.id));
            }
            for file in &transfer.files {
                if !seen.insert(file.id) {
                    return Err(ManifestError::DuplicateFile(file.id));
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let manifest: Manifest = toml::from_str(s)?;
        manifest.check()?;
        Ok(manifest)
    }
}
