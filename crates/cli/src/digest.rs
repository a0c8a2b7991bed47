//! SHA-256 digests of files named on input lines.

use std::io;
use std::path::Path;

use nutsandbolts_core::{OutputFormat, WorkerLease};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::metrics;

/// Size of each worker's read buffer.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDigest {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

impl FileDigest {
    /// Renders the digest as one output line, without the newline.
    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Text => Ok(format!("{}  {}", self.sha256, self.path)),
            OutputFormat::Json => serde_json::to_string(self),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to digest {path}: {source}")]
pub struct DigestError {
    path: String,
    #[source]
    source: io::Error,
}

/// Worker function: digests the file named by `line` using the worker's
/// read buffer. Blank lines produce no result.
pub async fn digest_line(
    mut buffer: WorkerLease<Vec<u8>>,
    line: String,
) -> Result<Option<FileDigest>, DigestError> {
    let path = line.trim();
    if path.is_empty() {
        return Ok(None);
    }
    if buffer.is_empty() {
        buffer.resize(READ_BUFFER_SIZE, 0);
    }

    hash_file(&mut buffer, Path::new(path))
        .await
        .map(Some)
        .map_err(|source| DigestError {
            path: path.to_string(),
            source,
        })
}

/// Streams the file at `path` through SHA-256, reading into `buffer`.
pub async fn hash_file(buffer: &mut [u8], path: &Path) -> io::Result<FileDigest> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    loop {
        let read = file.read(buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        bytes += read as u64;
    }

    metrics::FILES_DIGESTED.inc();
    metrics::BYTES_DIGESTED.inc_by(bytes);

    Ok(FileDigest {
        path: path.display().to_string(),
        sha256: format!("{:x}", hasher.finalize()),
        bytes,
    })
}
