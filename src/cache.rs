//! Per-board build cache.
//!
//! Each board directory holds one `build_cache.json`, a flat JSON object mapping
//! `"{board}_{example}"` to that example's last known-good [`Fingerprint`]. The
//! entry also carries the digest of the board configuration it was built with,
//! under the reserved [`CONFIG_KEY`].
//!
//! ## Rules
//!
//! - An entry only exists after a successful build, and is replaced whole.
//! - Unknown or malformed entries read as a cache miss, never as an error.
//! - Asking whether a rebuild is needed never writes anything.
//! - A different board configuration digest forces a full rebuild.
//! - Any library source newer than the cache file forces a full rebuild, since
//!   library files are not fingerprinted by content.

use crate::error::{Result, SweepError};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const CACHE_FILE: &str = "build_cache.json";

/// Reserved key inside an entry holding the board configuration digest.
pub const CONFIG_KEY: &str = "__config__";

pub fn cache_key(target: &str, unit: &str) -> String {
    format!("{target}_{unit}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// No cache entry for this (board, example).
    ColdStart,
    /// Defines, flags or board options differ from the last good build.
    ConfigChanged,
    /// A library source file is newer than the cache file.
    LibraryChanged(PathBuf),
    /// Example files differ from the cached fingerprint.
    Changed,
    UpToDate,
}

#[derive(Debug, Clone)]
pub struct RebuildDecision {
    pub needs_rebuild: bool,
    pub changed: BTreeSet<String>,
    pub reason: RebuildReason,
}

impl RebuildDecision {
    /// True when every file must be resynced rather than just `changed`.
    pub fn is_full(&self) -> bool {
        matches!(
            self.reason,
            RebuildReason::ColdStart
                | RebuildReason::ConfigChanged
                | RebuildReason::LibraryChanged(_)
        )
    }
}

/// Per-board cache statistics for `bsweep cache stats`.
#[derive(Debug, Clone)]
pub struct TargetCacheStats {
    pub target: String,
    pub file: Option<CacheFileStats>,
    pub error: Option<String>,
}

/// One stored (board, example) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Missing in entries written before configuration tracking.
    pub config: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheFileStats {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Example name → number of fingerprinted files.
    pub entries: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct BuildCacheStore {
    build_root: PathBuf,
    library_roots: Vec<PathBuf>,
    fingerprinter: Fingerprinter,
}

impl BuildCacheStore {
    pub fn new(
        build_root: impl Into<PathBuf>,
        library_roots: Vec<PathBuf>,
        fingerprinter: Fingerprinter,
    ) -> Self {
        Self {
            build_root: build_root.into(),
            library_roots,
            fingerprinter,
        }
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn cache_file(&self, target: &str) -> PathBuf {
        self.build_root.join(target).join(CACHE_FILE)
    }

    /// Raw document; missing or unparsable files read as empty.
    fn load(&self, target: &str) -> Map<String, Value> {
        let path = self.cache_file(target);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!("could not read build cache {}: {}", path.display(), e);
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!("ignoring malformed build cache {}", path.display());
                Map::new()
            }
        }
    }

    /// The stored entry, if present and well-formed.
    pub fn entry(&self, target: &str, unit: &str) -> Option<CacheEntry> {
        let doc = self.load(target);
        let value = doc.get(&cache_key(target, unit))?;
        parse_entry(value)
    }

    /// `config` is the digest of the board configuration the build would use.
    pub fn needs_rebuild(
        &self,
        target: &str,
        unit: &str,
        current: &Fingerprint,
        config: &str,
    ) -> RebuildDecision {
        let key = cache_key(target, unit);
        let Some(cached) = self.entry(target, unit) else {
            tracing::debug!("no cache entry for {key}, full rebuild needed");
            return RebuildDecision {
                needs_rebuild: true,
                changed: current.paths(),
                reason: RebuildReason::ColdStart,
            };
        };

        if cached.config.as_deref() != Some(config) {
            tracing::debug!("board configuration changed for {key}, full rebuild needed");
            return RebuildDecision {
                needs_rebuild: true,
                changed: current.paths(),
                reason: RebuildReason::ConfigChanged,
            };
        }

        if let Some(path) = self.newer_library_file(target) {
            tracing::debug!("library file {} modified, rebuild needed", path.display());
            return RebuildDecision {
                needs_rebuild: true,
                changed: current.paths(),
                reason: RebuildReason::LibraryChanged(path),
            };
        }

        let changed = current.changed_paths(&cached.fingerprint);
        if changed.is_empty() {
            tracing::debug!("no rebuild needed for {key}");
            RebuildDecision {
                needs_rebuild: false,
                changed,
                reason: RebuildReason::UpToDate,
            }
        } else {
            tracing::debug!("rebuild needed for {key}, changed files: {changed:?}");
            RebuildDecision {
                needs_rebuild: true,
                changed,
                reason: RebuildReason::Changed,
            }
        }
    }

    fn newer_library_file(&self, target: &str) -> Option<PathBuf> {
        let cache_mtime = fs::metadata(self.cache_file(target))
            .and_then(|m| m.modified())
            .ok()?;
        self.library_roots
            .iter()
            .filter(|root| root.is_dir())
            .find_map(|root| self.fingerprinter.newer_than(root, cache_mtime))
    }

    /// Replace the entry for (target, unit). Call only after a verified build.
    pub fn update(
        &self,
        target: &str,
        unit: &str,
        fingerprint: &Fingerprint,
        config: &str,
    ) -> Result<()> {
        let path = self.cache_file(target);
        let mut doc = self.load(target);
        let mut value =
            serde_json::to_value(fingerprint).map_err(|e| SweepError::cache(&path, e))?;
        if let Value::Object(obj) = &mut value {
            obj.insert(CONFIG_KEY.to_string(), Value::String(config.to_string()));
        }
        doc.insert(cache_key(target, unit), value);
        write_atomic(&path, &Value::Object(doc))
    }

    /// Drop one example's entry, or the whole board file when `unit` is None.
    pub fn clear(&self, target: &str, unit: Option<&str>) -> Result<()> {
        let path = self.cache_file(target);
        match unit {
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SweepError::io(&path, e)),
            },
            Some(unit) => {
                let mut doc = self.load(target);
                if doc.remove(&cache_key(target, unit)).is_none() {
                    return Ok(());
                }
                write_atomic(&path, &Value::Object(doc))
            }
        }
    }

    /// Remove every board's cache file. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for target in self.board_dirs()? {
            let path = self.cache_file(&target);
            if path.exists() {
                self.clear(&target, None)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn board_dirs(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.build_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SweepError::io(&self.build_root, e)),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn stats(&self) -> Result<Vec<TargetCacheStats>> {
        let mut out = Vec::new();
        for target in self.board_dirs()? {
            let path = self.cache_file(&target);
            if !path.exists() {
                out.push(TargetCacheStats {
                    target,
                    file: None,
                    error: None,
                });
                continue;
            }
            match read_stats(&target, &path) {
                Ok(file) => out.push(TargetCacheStats {
                    target,
                    file: Some(file),
                    error: None,
                }),
                Err(e) => out.push(TargetCacheStats {
                    target,
                    file: None,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(out)
    }
}

fn parse_entry(value: &Value) -> Option<CacheEntry> {
    let obj = value.as_object()?;
    let mut map = BTreeMap::new();
    let mut config = None;
    for (path, digest) in obj {
        let digest = digest.as_str()?.to_string();
        if path == CONFIG_KEY {
            config = Some(digest);
        } else {
            map.insert(path.clone(), digest);
        }
    }
    Some(CacheEntry {
        fingerprint: Fingerprint::from_map(map),
        config,
    })
}

fn read_stats(target: &str, path: &Path) -> Result<CacheFileStats> {
    let meta = fs::metadata(path).map_err(|e| SweepError::io(path, e))?;
    let content = fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
    let doc: Map<String, Value> =
        serde_json::from_str(&content).map_err(|e| SweepError::cache(path, e))?;

    let prefix = format!("{target}_");
    let entries = doc
        .iter()
        .map(|(key, value)| {
            let unit = key.strip_prefix(&prefix).unwrap_or(key).to_string();
            let count = value
                .as_object()
                .map_or(0, |obj| obj.keys().filter(|k| *k != CONFIG_KEY).count());
            (unit, count)
        })
        .collect();

    Ok(CacheFileStats {
        size: meta.len(),
        modified: meta.modified().ok(),
        entries,
    })
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
fn write_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|e| SweepError::cache(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| SweepError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| SweepError::io(path, e))
}
