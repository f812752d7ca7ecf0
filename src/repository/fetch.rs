// src/repository/fetch.rs

//! Remote data access for repository metadata and artifacts.
//!
//! Repositories are addressed by `http(s)://` or `file://` URLs; the
//! latter keeps fixture repositories and air-gapped mirrors working
//! without a web server.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Timeout for metadata requests. Artifact downloads reuse the same
/// client; large files are streamed so only connect latency counts.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(HTTP_TIMEOUT)
        .build()
        .expect("HTTP client")
});

/// Fetch the full contents of a URL into memory.
pub fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    debug!("fetching {}", url);
    if let Some(path) = file_url_path(url) {
        return Ok(fs::read(&path)
            .map_err(|e| Error::DownloadError(format!("read {path}: {e}")))?);
    }

    let response = HTTP
        .get(url)
        .send()
        .map_err(|e| Error::DownloadError(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::DownloadError(format!(
            "HTTP {} from {url}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .map_err(|e| Error::DownloadError(format!("read body of {url}: {e}")))?;
    Ok(bytes.to_vec())
}

/// Download a URL to `dest`, writing through a temp file so a partial
/// transfer never masquerades as a complete artifact.
pub fn download_to(url: &str, dest: &Path) -> Result<()> {
    debug!("downloading {} -> {}", url, dest.display());
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::IoError(format!("create {}: {e}", parent.display())))?;
    }

    let tmp = dest.with_extension("part");
    {
        let mut out = File::create(&tmp)
            .map_err(|e| Error::IoError(format!("create {}: {e}", tmp.display())))?;

        if let Some(path) = file_url_path(url) {
            let mut input = File::open(&path)
                .map_err(|e| Error::DownloadError(format!("open {path}: {e}")))?;
            io::copy(&mut input, &mut out)
                .map_err(|e| Error::IoError(format!("copy to {}: {e}", tmp.display())))?;
        } else {
            let mut response = HTTP
                .get(url)
                .send()
                .map_err(|e| Error::DownloadError(format!("GET {url}: {e}")))?;
            if !response.status().is_success() {
                let _ = fs::remove_file(&tmp);
                return Err(Error::DownloadError(format!(
                    "HTTP {} from {url}",
                    response.status()
                )));
            }
            copy_stream(&mut response, &mut out)
                .map_err(|e| Error::IoError(format!("write {}: {e}", tmp.display())))?;
        }
        out.sync_all()
            .map_err(|e| Error::IoError(format!("sync {}: {e}", tmp.display())))?;
    }

    fs::rename(&tmp, dest)
        .map_err(|e| Error::IoError(format!("rename to {}: {e}", dest.display())))?;
    Ok(())
}

fn copy_stream<R: Read>(input: &mut R, out: &mut File) -> io::Result<u64> {
    io::copy(input, out)
}

/// Extract the filesystem path of a `file://` URL, if it is one.
fn file_url_path(url: &str) -> Option<String> {
    url.strip_prefix("file://").map(|p| p.to_string())
}

/// Hex-encoded SHA-256 digest of a file.
pub fn sha256_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("open {} for checksum: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("read {} for checksum: {e}", path.display())))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare a file against an expected hex SHA-256 digest.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_hex(path)?;
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
