//! Content fingerprints for example trees.
//!
//! A [`Fingerprint`] maps every regular file under a root (as a `/`-separated
//! relative path) to a SHA-256 digest of its bytes. Paths that pass through a
//! directory or file whose name is in the exclusion list are skipped, so build
//! output written next to the sources never triggers a rebuild of itself.
//!
//! When a file cannot be read the digest falls back to its modification time,
//! prefixed with `mtime:`. Those entries are low-confidence and reported as such.

use crate::error::{Result, SweepError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Prefix marking a digest that was derived from a modification time.
pub const MTIME_PREFIX: &str = "mtime:";

/// Relative path → digest. Serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(BTreeMap<String, String>);

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_low_confidence(&self, path: &str) -> bool {
        self.get(path).is_some_and(|d| d.starts_with(MTIME_PREFIX))
    }

    pub fn low_confidence_paths(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, d)| d.starts_with(MTIME_PREFIX))
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Paths present on only one side, or on both with different digests.
    pub fn changed_paths(&self, other: &Fingerprint) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (path, digest) in &self.0 {
            if other.0.get(path) != Some(digest) {
                changed.insert(path.clone());
            }
        }
        for path in other.0.keys() {
            if !self.0.contains_key(path) {
                changed.insert(path.clone());
            }
        }
        changed
    }
}

/// Computes fingerprints, skipping any path segment named in `exclude`.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    exclude: Vec<String>,
}

impl Fingerprinter {
    pub fn new<I, S>(exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    fn is_excluded_name(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    /// Regular files under `root`, as (relative key, absolute path), sorted by key.
    pub fn files(&self, root: &Path) -> Result<Vec<(String, PathBuf)>> {
        let meta = fs::metadata(root).map_err(|e| SweepError::io(root, e))?;
        if !meta.is_dir() {
            return Err(SweepError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded_name(&e.file_name().to_string_lossy()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            files.push((relative_key(rel), entry.path().to_path_buf()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Fingerprint every file under `root`. Pure: no writes, stable ordering.
    pub fn fingerprint(&self, root: &Path) -> Result<Fingerprint> {
        let files = self.files(root)?;
        let map: BTreeMap<String, String> = files
            .par_iter()
            .map(|(key, path)| (key.clone(), digest_file(path)))
            .collect();
        Ok(Fingerprint(map))
    }

    /// First file under `root` modified after `since`, if any.
    pub fn newer_than(&self, root: &Path, since: SystemTime) -> Option<PathBuf> {
        let files = self.files(root).ok()?;
        files.into_iter().map(|(_, p)| p).find(|p| {
            fs::metadata(p)
                .and_then(|m| m.modified())
                .is_ok_and(|t| t > since)
        })
    }
}

fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// SHA-256 of the file contents, or an `mtime:` digest when unreadable.
pub fn digest_file(path: &Path) -> String {
    match sha256_file(path) {
        Ok(hex) => hex,
        Err(e) => {
            tracing::warn!("could not hash {}: {}, using mtime", path.display(), e);
            mtime_digest(path)
        }
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn mtime_digest(path: &Path) -> String {
    let nanos = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{MTIME_PREFIX}{nanos}")
}
