//! Removal that survives a racy filesystem.
//!
//! Several workers share one build root, antivirus and indexers hold files
//! open on Windows, and toolchains leave read-only files behind. Removal is
//! therefore retried with exponential backoff, read-only bits are cleared
//! between attempts, and a path that vanished underneath us counts as removed.

use crate::error::{Result, SweepError};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    /// Double the delay after each failed attempt, otherwise grow linearly.
    pub exponential: bool,
}

impl RetryPolicy {
    pub const DIRECTORY: RetryPolicy = RetryPolicy {
        attempts: 5,
        base_delay: Duration::from_millis(100),
        exponential: true,
    };

    pub const FILE: RetryPolicy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(100),
        exponential: false,
    };

    /// Delay after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.base_delay * 2u32.saturating_pow(attempt)
        } else {
            self.base_delay * (attempt + 1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing was there, or someone else removed it first.
    AlreadyGone,
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Remove a directory tree (or a single file or symlink) with [`RetryPolicy::DIRECTORY`].
pub fn robust_remove(path: &Path) -> Result<Removal> {
    robust_remove_with(path, RetryPolicy::DIRECTORY)
}

pub fn robust_remove_with(path: &Path, policy: RetryPolicy) -> Result<Removal> {
    let mut last_err = None;
    for attempt in 0..policy.attempts {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(if attempt == 0 {
                    Removal::AlreadyGone
                } else {
                    Removal::Removed
                });
            }
            Err(e) => return Err(SweepError::io(path, e)),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => {
                tracing::debug!("removed {}", path.display());
                return Ok(Removal::Removed);
            }
            Err(e) if e.kind() == ErrorKind::NotFound || !exists(path) => {
                tracing::debug!("{} was removed by another process", path.display());
                return Ok(Removal::Removed);
            }
            Err(e) => {
                tracing::warn!(
                    "failed to remove {} (attempt {}/{}): {}",
                    path.display(),
                    attempt + 1,
                    policy.attempts,
                    e
                );
                last_err = Some(e);
                if attempt + 1 < policy.attempts {
                    clear_readonly(path);
                    thread::sleep(policy.delay(attempt));
                }
            }
        }
    }

    Err(SweepError::RemoveFailed {
        path: path.to_path_buf(),
        attempts: policy.attempts,
        source: last_err.unwrap_or_else(|| std::io::Error::other("no attempts made")),
    })
}

/// Remove one file with [`RetryPolicy::FILE`].
pub fn safe_remove_file(path: &Path) -> Result<Removal> {
    robust_remove_with(path, RetryPolicy::FILE)
}

/// Advisory removal: failure is logged, never returned.
pub fn remove_advisory(path: &Path) -> bool {
    match robust_remove(path) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("{e}, continuing anyway");
            false
        }
    }
}

/// Make everything under `path` writable so the next attempt can delete it.
#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).into_iter().flatten() {
        let Ok(meta) = entry.path().symlink_metadata() else {
            continue;
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            if let Err(e) = fs::set_permissions(entry.path(), perms) {
                tracing::debug!("could not clear read-only on {}: {}", entry.path().display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_path_is_success() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("never-existed");
        assert_eq!(robust_remove(&gone).unwrap(), Removal::AlreadyGone);
        assert_eq!(safe_remove_file(&gone).unwrap(), Removal::AlreadyGone);
    }

    #[test]
    fn test_removes_tree_and_file() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("src");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/a.cpp"), "x").unwrap();
        assert_eq!(robust_remove(&tree).unwrap(), Removal::Removed);
        assert!(!tree.exists());

        let file = dir.path().join("platformio.ini");
        fs::write(&file, "[env]").unwrap();
        assert_eq!(safe_remove_file(&file).unwrap(), Removal::Removed);
        assert!(!file.exists());
    }

    #[test]
    fn test_read_only_contents_are_removed() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("lib");
        fs::create_dir_all(&tree).unwrap();
        let file = tree.join("locked.h");
        fs::write(&file, "x").unwrap();
        let mut perms = fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).unwrap();

        robust_remove(&tree).unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn test_concurrent_removal_never_fails() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("shared");
        for i in 0..50 {
            let sub = tree.join(format!("d{i}"));
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join("f.o"), "obj").unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tree = tree.clone();
                thread::spawn(move || robust_remove(&tree))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        assert!(!tree.exists());
    }

    #[test]
    fn test_backoff_schedule() {
        let d = RetryPolicy::DIRECTORY;
        assert_eq!(d.delay(0), Duration::from_millis(100));
        assert_eq!(d.delay(3), Duration::from_millis(800));
        let f = RetryPolicy::FILE;
        assert_eq!(f.delay(1), Duration::from_millis(200));
    }
}
