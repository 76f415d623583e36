//! On-disk gallery cache keyed by a hash of the reference set.
//!
//! Rebuilding the gallery means one embedder pass per reference image. The
//! cache stores the finished centroids as JSON next to a SHA-256 key over the
//! embedder model id, every label, every path and every image's bytes, so any
//! change to the inputs invalidates it.

use crate::gallery::{Gallery, ReferenceSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    key: String,
    gallery: Gallery,
}

/// Compute the cache key for a reference set.
///
/// Unreadable images contribute their path only, so a later fix to the file
/// changes the key.
pub fn cache_key(model_id: &str, sets: &[ReferenceSet]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    for set in sets {
        hasher.update([0u8]);
        hasher.update(set.label.as_bytes());
        for path in &set.images {
            hasher.update([1u8]);
            hasher.update(path.to_string_lossy().as_bytes());
            match std::fs::read(path) {
                Ok(bytes) => {
                    hasher.update([2u8]);
                    hasher.update(&bytes);
                }
                Err(_) => hasher.update([3u8]),
            }
        }
    }
    hex(&hasher.finalize())
}

/// Load a cached gallery if the file exists and its key matches.
///
/// Any problem (missing, stale, corrupt) is logged and yields `None`.
pub fn load(path: &Path, key: &str) -> Option<Gallery> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no gallery cache");
            return None;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "gallery cache unreadable");
            return None;
        }
    };

    match serde_json::from_slice::<CacheFile>(&bytes) {
        Ok(file) if file.key == key => {
            tracing::info!(path = %path.display(), identities = file.gallery.len(), "gallery loaded from cache");
            Some(file.gallery)
        }
        Ok(_) => {
            tracing::info!(path = %path.display(), "gallery cache is stale");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "gallery cache corrupt");
            None
        }
    }
}

/// Write the gallery to `path` under `key`, creating parent directories.
pub fn store(path: &Path, key: &str, gallery: &Gallery) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = CacheFile {
        key: key.to_string(),
        gallery: gallery.clone(),
    };
    // Readers only ever see a complete file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(&file)?)?;
    std::fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "gallery cache written");
    Ok(())
}

/// Short SHA-256 fingerprint of a file's contents.
pub(crate) fn file_fingerprint(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut std::fs::File::open(path)?, &mut hasher)?;
    let mut digest = hex(&hasher.finalize());
    digest.truncate(16);
    Ok(digest)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
