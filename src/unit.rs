//! Example (build unit) discovery and selection.

use crate::error::{Result, SweepError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A named example tree with exactly one canonical sketch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub name: String,
    pub dir: PathBuf,
    /// Sketch file name, relative to `dir`.
    pub entry: String,
    /// Subdirectories holding their own C/C++ sources, passed as extra libraries.
    pub extra_libs: Vec<PathBuf>,
}

impl BuildUnit {
    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }
}

/// Strip an `examples/` prefix and trailing separators: `examples/Blink/` → `Blink`.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim().replace('\\', "/");
    let trimmed = trimmed.trim_end_matches('/');
    trimmed
        .strip_prefix("examples/")
        .unwrap_or(trimmed)
        .to_string()
}

/// Normalize, drop excluded names, and de-duplicate preserving first occurrence.
pub fn select_units(requested: &[String], exclude: &[String]) -> Vec<String> {
    let excluded: HashSet<String> = exclude.iter().map(|e| normalize_name(e)).collect();
    let mut seen = HashSet::new();
    requested
        .iter()
        .map(|r| normalize_name(r))
        .filter(|n| !n.is_empty() && !excluded.contains(n))
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

pub fn resolve_unit(examples_dir: &Path, name: &str) -> Result<BuildUnit> {
    let name = normalize_name(name);
    let dir = examples_dir.join(&name);
    if !dir.is_dir() {
        return Err(SweepError::UnitNotFound { name, path: dir });
    }

    let mut sketches: Vec<String> = fs::read_dir(&dir)
        .map_err(|e| SweepError::io(&dir, e))?
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|f| f.ends_with(".ino"))
        .collect();
    sketches.sort();

    let short = name.rsplit('/').next().unwrap_or(&name).to_string();
    let canonical = format!("{short}.ino");
    let entry = if sketches.contains(&canonical) {
        canonical
    } else {
        match sketches.len() {
            0 => return Err(SweepError::MissingEntry { unit: name, dir }),
            1 => sketches.remove(0),
            _ => {
                return Err(SweepError::AmbiguousEntry {
                    unit: name,
                    candidates: sketches,
                });
            }
        }
    };

    let extra_libs = source_subdirs(&dir);
    Ok(BuildUnit {
        name,
        dir,
        entry,
        extra_libs,
    })
}

/// Resolve every name; the first invalid one aborts.
pub fn resolve_units(examples_dir: &Path, names: &[String]) -> Result<Vec<BuildUnit>> {
    names.iter().map(|n| resolve_unit(examples_dir, n)).collect()
}

/// Immediate subdirectories containing `.c`/`.cpp` files anywhere below them.
fn source_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .filter(|p| has_sources(p))
        .collect();
    subdirs.sort();
    subdirs
}

fn has_sources(dir: &Path) -> bool {
    WalkDir::new(dir).into_iter().flatten().any(|e| {
        e.file_type().is_file()
            && e.path()
                .extension()
                .is_some_and(|ext| ext == "c" || ext == "cpp")
    })
}

/// Every example directory under `examples_dir` that holds a sketch, sorted.
pub fn discover_units(examples_dir: &Path) -> Result<Vec<String>> {
    if !examples_dir.is_dir() {
        return Err(SweepError::Config(format!(
            "examples directory '{}' does not exist",
            examples_dir.display()
        )));
    }
    let mut names: Vec<String> = WalkDir::new(examples_dir)
        .min_depth(2)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "ino"))
        .filter_map(|e| {
            let parent = e.path().parent()?;
            let rel = parent.strip_prefix(examples_dir).ok()?;
            Some(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        })
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}
