//! On-disk cache of converted images.
//!
//! Running `convert` is the expensive part of every request, and the same
//! source/options pair always produces the same bytes. When `[cache]` is
//! enabled, the first response for a pair is written to disk and later
//! requests are served from the file without spawning anything.
//!
//! ## Layout
//!
//! ```text
//! <cache.dir>/
//! ├── local/<request path>/<cache name>
//! └── remote/<sha256(url)>/<cache name>
//! ```
//!
//! The cache name is derived from the planned pipeline: the named filters
//! joined by `+` (or `base` when there are none) plus the format extension,
//! e.g. `resize_200_200_2+crop_Center_200x200+0+0.jpeg`. Names longer than
//! [`MAX_NAME_LEN`] bytes are replaced by their SHA-256 so deep pipelines
//! still fit in a file name.
//!
//! ## Write-once
//!
//! Entries are never rewritten. The response is buffered while it streams to
//! the client, written to a temp file in the target directory once the
//! conversion has completed successfully, then renamed into place. A failed
//! or aborted conversion leaves nothing behind, and readers never observe a
//! partial file.

use crate::imaging::Pipeline;
use crate::source::Source;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

/// Longest cache file name kept verbatim.
pub const MAX_NAME_LEN: usize = 200;

/// SHA-256 of a string, returned as a hex string.
pub fn hash_key(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// File name under which a pipeline's output is cached.
pub fn entry_name(pipeline: &Pipeline) -> String {
    let name = pipeline.cache_name();
    if name.len() <= MAX_NAME_LEN {
        name
    } else {
        format!("{}.{}", hash_key(&name), pipeline.format().extension())
    }
}

/// Write-once file cache rooted at `[cache] dir`.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    stats: CacheStats,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Path where the output for `source` through `pipeline` lives.
    pub fn entry_path(&self, source: &Source, pipeline: &Pipeline) -> PathBuf {
        self.root
            .join(source.cache_key())
            .join(entry_name(pipeline))
    }

    /// Read a cached entry. Missing and empty files count as a miss.
    pub async fn lookup(&self, path: &Path) -> Option<Bytes> {
        let hit = match tokio::fs::read(path).await {
            Ok(data) if !data.is_empty() => Some(Bytes::from(data)),
            _ => None,
        };
        match hit {
            Some(_) => self.stats.hit(),
            None => self.stats.miss(),
        }
        hit
    }

    /// Store a completed conversion.
    ///
    /// Returns `Ok(false)` without touching the file if the entry already
    /// exists (another request finished first).
    pub async fn store(&self, path: PathBuf, data: Bytes) -> io::Result<bool> {
        let stored = tokio::task::spawn_blocking(move || write_entry(&path, &data))
            .await
            .map_err(io::Error::other)??;
        if stored {
            self.stats.store();
        }
        Ok(stored)
    }
}

fn write_entry(path: &Path, data: &[u8]) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("cache entry has no parent directory"))?;
    std::fs::create_dir_all(dir)?;
    persist_entry(dir, path, data)
}

/// Write through a temp file in `dir` and move it to `path` unless
/// something is already there. Concurrent writers race on the final move;
/// the loser's temp file is discarded.
fn persist_entry(dir: &Path, path: &Path, data: &[u8]) -> io::Result<bool> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Cache counters, shared across requests.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`], as reported on `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

impl CacheSnapshot {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} converted ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} converted", self.misses)
        }
    }
}
