//! Weight resolution: cache-or-fetch of model weight files.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::error::UpscaleError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A resolved weight file. Only handed out once the referenced file exists
/// and is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightsHandle {
    pub model: String,
    pub path: PathBuf,
}

/// Resolves a model identifier to a local weight file, downloading from the
/// catalog source on first use and caching under `cache_dir` thereafter.
pub struct WeightResolver {
    cache_dir: PathBuf,
    catalog: ModelCatalog,
}

impl WeightResolver {
    pub fn new(cache_dir: PathBuf, catalog: ModelCatalog) -> Self {
        Self { cache_dir, catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Deterministic cache path for a model, whether or not it is cached yet.
    pub fn cache_path(&self, name: &str) -> Option<PathBuf> {
        self.catalog
            .get(name)
            .map(|e| self.cache_dir.join(&e.filename))
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache_path(name)
            .map(|p| file_is_usable(&p))
            .unwrap_or(false)
    }

    /// Resolve `name` to a local weight file, fetching it on a cache miss.
    ///
    /// Unknown identifiers fail before any filesystem or network activity.
    /// A zero-length cache file is treated as a miss so a previously
    /// interrupted download can never be served as valid weights.
    pub fn resolve(&self, name: &str) -> Result<WeightsHandle, UpscaleError> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| UpscaleError::UnknownModel(name.to_string()))?;

        let path = self.cache_dir.join(&entry.filename);
        if file_is_usable(&path) {
            info!(model = %name, path = %path.display(), "Using cached model weights");
            return Ok(WeightsHandle {
                model: name.to_string(),
                path,
            });
        }

        self.fetch(entry, &path)?;
        Ok(WeightsHandle {
            model: name.to_string(),
            path,
        })
    }

    /// Download into `{filename}.part`, verify, then atomically rename onto
    /// the final path. The partial file is removed on every failure path.
    fn fetch(&self, entry: &ModelDescriptor, final_path: &Path) -> Result<(), UpscaleError> {
        let fail = |reason: String| UpscaleError::DownloadFailed {
            model: entry.name.clone(),
            reason,
        };

        fs::create_dir_all(&self.cache_dir).map_err(|e| {
            fail(format!(
                "cannot create cache directory {}: {e}",
                self.cache_dir.display()
            ))
        })?;

        let tmp_path = self.cache_dir.join(format!("{}.part", entry.filename));

        info!(model = %entry.name, url = %entry.url, "Downloading model weights");

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| fail(format!("cannot build HTTP client: {e}")))?;

        let mut response = client
            .get(&entry.url)
            .send()
            .map_err(|e| fail(format!("request to {} failed: {e}", entry.url)))?;

        if !response.status().is_success() {
            return Err(fail(format!(
                "server returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let result = (|| -> Result<(), UpscaleError> {
            let mut tmp_file = fs::File::create(&tmp_path)
                .map_err(|e| fail(format!("cannot create {}: {e}", tmp_path.display())))?;

            response
                .copy_to(&mut tmp_file)
                .map_err(|e| fail(format!("transfer from {} failed: {e}", entry.url)))?;

            tmp_file
                .sync_all()
                .map_err(|e| fail(format!("cannot flush {}: {e}", tmp_path.display())))?;

            let size = tmp_file
                .metadata()
                .map(|m| m.len())
                .map_err(|e| fail(format!("cannot stat {}: {e}", tmp_path.display())))?;
            if size == 0 {
                return Err(fail("server returned an empty file".into()));
            }

            if let Some(expected) = &entry.sha256 {
                let actual = sha256_file(&tmp_path)
                    .map_err(|e| fail(format!("cannot hash downloaded file: {e}")))?;
                if &actual != expected {
                    return Err(fail(format!(
                        "SHA256 mismatch: expected {expected}, got {actual}"
                    )));
                }
                info!(model = %entry.name, "Weight hash verified");
            } else {
                warn!(model = %entry.name, "No SHA256 configured for model — skipping verification");
            }

            fs::rename(&tmp_path, final_path).map_err(|e| {
                fail(format!(
                    "cannot move {} into place: {e}",
                    tmp_path.display()
                ))
            })?;

            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        } else {
            info!(model = %entry.name, path = %final_path.display(), "Download complete");
        }

        result
    }
}

fn file_is_usable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write_all(&buf[..n])?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}
