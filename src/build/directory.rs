//! Per-board build directories.
//!
//! ```text
//! <build_root>/<board>/
//!     src/               copy of the example currently being built
//!     lib/               installed library trees (project mode)
//!     boards/            custom board definitions
//!     platformio.ini     generated by project init
//!     build_info.json    toolchain metadata
//!     build_cache.json   per-example fingerprints
//!     .active_unit       name of the example occupying src/
//! ```
//!
//! Only the worker that owns a board touches its directory.

use super::remove::{Removal, remove_advisory, robust_remove, safe_remove_file};
use crate::cache::{CACHE_FILE, RebuildDecision};
use crate::config::{LibraryInstall, Target};
use crate::error::{Result, SweepError};
use crate::fingerprint::Fingerprinter;
use crate::unit::BuildUnit;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SRC_DIR: &str = "src";
pub const LIB_DIR: &str = "lib";
pub const BOARDS_DIR: &str = "boards";
pub const PROJECT_FILE: &str = "platformio.ini";
pub const ACTIVE_UNIT_FILE: &str = ".active_unit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Copy every example file over whatever is in `src/`.
    Full,
    /// Copy only these relative paths; paths gone from the example are deleted.
    Incremental(BTreeSet<String>),
    /// Wipe `src/`, then copy everything. Required when another example occupied it.
    CleanSwitch,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full sync"),
            SyncMode::Incremental(changed) => write!(f, "incremental sync ({} files)", changed.len()),
            SyncMode::CleanSwitch => write!(f, "clean switch"),
        }
    }
}

/// Pick the sync for a unit that is about to be built.
///
/// A different (or unknown) occupant always means `CleanSwitch`: two examples
/// may both define `setup()`/`loop()`, and a leftover file would shadow the new
/// one. Same occupant reuses `src/` incrementally when the cache allows it and
/// `src/` still holds files; a missing or emptied `src/` gets a full copy.
pub fn choose_sync_mode(
    force_rebuild: bool,
    occupant: Option<&str>,
    unit: &str,
    src_present: bool,
    decision: &RebuildDecision,
) -> SyncMode {
    if force_rebuild || occupant != Some(unit) {
        SyncMode::CleanSwitch
    } else if !src_present {
        tracing::debug!("src directory missing for {unit}, forcing full sync");
        SyncMode::Full
    } else if decision.is_full() || decision.changed.is_empty() {
        SyncMode::Full
    } else {
        SyncMode::Incremental(decision.changed.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct BuildDirectoryManager {
    build_root: PathBuf,
}

impl BuildDirectoryManager {
    pub fn new(build_root: impl Into<PathBuf>) -> Self {
        Self {
            build_root: build_root.into(),
        }
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn dir_for(&self, target: &Target) -> BuildDirectory {
        BuildDirectory {
            root: self.build_root.join(&target.name),
        }
    }

    /// Create the board's directory if needed. Idempotent.
    pub fn ensure(&self, target: &Target) -> Result<BuildDirectory> {
        let dir = self.dir_for(target);
        fs::create_dir_all(&dir.root).map_err(|e| SweepError::io(&dir.root, e))?;
        Ok(dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirectory {
    root: PathBuf,
}

impl BuildDirectory {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join(SRC_DIR)
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join(LIB_DIR)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn project_file(&self) -> PathBuf {
        self.root.join(PROJECT_FILE)
    }

    /// True when `src/` exists and is not empty.
    pub fn has_sources(&self) -> bool {
        fs::read_dir(self.src_dir()).is_ok_and(|mut entries| entries.next().is_some())
    }

    fn marker(&self) -> PathBuf {
        self.root.join(ACTIVE_UNIT_FILE)
    }

    /// Which example's sources `src/` currently holds, if known.
    pub fn active_unit(&self) -> Option<String> {
        let name = fs::read_to_string(self.marker()).ok()?;
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn set_active_unit(&self, name: Option<&str>) -> Result<()> {
        let marker = self.marker();
        match name {
            Some(name) => fs::write(&marker, name).map_err(|e| SweepError::io(&marker, e)),
            None => safe_remove_file(&marker).map(|_| ()),
        }
    }

    /// Reset per-init state before project init regenerates it.
    ///
    /// The library copy is refreshed lazily, so failing to remove it only
    /// warns. A stale `platformio.ini` would override the new settings, and a
    /// half-replaced `boards/` would mix definitions, so those are fatal.
    pub fn prepare_for_init(&self, boards_source: Option<&Path>) -> Result<()> {
        let lib = self.lib_dir();
        if lib.exists() && !remove_advisory(&lib) {
            tracing::warn!("stale library copy left in {}", lib.display());
        }

        safe_remove_file(&self.project_file())?;

        if let Some(source) = boards_source {
            let dst = self.root.join(BOARDS_DIR);
            robust_remove(&dst)?;
            copy_tree(source, &dst, &Fingerprinter::default())?;
        }
        Ok(())
    }

    /// Bring `src/` in line with `unit` and record it as the occupant.
    pub fn sync_unit(
        &self,
        unit: &BuildUnit,
        mode: &SyncMode,
        fingerprinter: &Fingerprinter,
    ) -> Result<SyncReport> {
        let src = self.src_dir();
        let mut report = SyncReport::default();

        if *mode == SyncMode::CleanSwitch {
            self.set_active_unit(None)?;
            if robust_remove(&src)? == Removal::Removed {
                tracing::debug!("cleared {} for {}", src.display(), unit.name);
            }
        }
        fs::create_dir_all(&src).map_err(|e| SweepError::io(&src, e))?;

        match mode {
            SyncMode::Full | SyncMode::CleanSwitch => {
                report.copied = copy_tree(&unit.dir, &src, fingerprinter)?;
            }
            SyncMode::Incremental(changed) => {
                for rel in changed {
                    let from = unit.dir.join(rel);
                    let to = src.join(rel);
                    if from.is_file() {
                        copy_file(&from, &to)?;
                        report.copied += 1;
                    } else if safe_remove_file(&to)? == Removal::Removed {
                        report.removed += 1;
                    }
                }
            }
        }

        self.set_active_unit(Some(&unit.name))?;
        Ok(report)
    }

    /// Copy or link each library tree into `lib/`. Existing installs are
    /// replaced only when `refresh` is set. Returns how many were (re)installed.
    pub fn install_libraries(
        &self,
        libraries: &[PathBuf],
        mode: LibraryInstall,
        refresh: bool,
    ) -> Result<usize> {
        let lib_root = self.lib_dir();
        fs::create_dir_all(&lib_root).map_err(|e| SweepError::io(&lib_root, e))?;

        let mut installed = 0;
        for library in libraries {
            if !library.is_dir() {
                tracing::warn!("library directory {} not found", library.display());
                continue;
            }
            let Some(name) = library.file_name() else {
                continue;
            };
            let dst = lib_root.join(name);
            let present = fs::symlink_metadata(&dst).is_ok();
            if present && !refresh {
                continue;
            }
            if present {
                robust_remove(&dst)?;
            }

            match mode {
                LibraryInstall::Link => {
                    if let Err(e) = link_dir(library, &dst) {
                        tracing::warn!(
                            "could not link {} ({}), copying instead",
                            library.display(),
                            e
                        );
                        copy_tree(library, &dst, &Fingerprinter::default())?;
                    }
                }
                LibraryInstall::Copy => {
                    copy_tree(library, &dst, &Fingerprinter::default())?;
                }
            }
            installed += 1;
        }
        Ok(installed)
    }
}

/// Copy every non-excluded file under `from` into `to`. Returns the file count.
fn copy_tree(from: &Path, to: &Path, fingerprinter: &Fingerprinter) -> Result<usize> {
    let files = fingerprinter.files(from)?;
    fs::create_dir_all(to).map_err(|e| SweepError::io(to, e))?;
    for (rel, path) in &files {
        copy_file(path, &to.join(rel))?;
    }
    Ok(files.len())
}

/// Copy contents and permissions, then carry over the modification time.
fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
    }
    fs::copy(from, to).map_err(|e| SweepError::io(from, e))?;
    if let Ok(mtime) = fs::metadata(from).and_then(|m| m.modified())
        && let Err(e) = fs::File::options()
            .write(true)
            .open(to)
            .and_then(|f| f.set_modified(mtime))
    {
        tracing::debug!("could not preserve mtime on {}: {}", to.display(), e);
    }
    Ok(())
}

#[cfg(unix)]
fn link_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    let from = from.canonicalize()?;
    std::os::unix::fs::symlink(from, to)
}

#[cfg(windows)]
fn link_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    let from = from.canonicalize()?;
    std::os::windows::fs::symlink_dir(from, to)
}

#[cfg(not(any(unix, windows)))]
fn link_dir(_from: &Path, _to: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks unsupported on this platform"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RebuildReason;
    use tempfile::{TempDir, tempdir};

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn unit(examples: &Path, name: &str, files: &[(&str, &str)]) -> BuildUnit {
        let dir = examples.join(name);
        for (rel, body) in files {
            write(&dir, rel, body);
        }
        BuildUnit {
            name: name.to_string(),
            dir,
            entry: format!("{name}.ino"),
            extra_libs: vec![],
        }
    }

    fn listing(root: &Path) -> BTreeSet<String> {
        Fingerprinter::default()
            .files(root)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    fn setup() -> (TempDir, BuildDirectory) {
        let tmp = tempdir().unwrap();
        let mgr = BuildDirectoryManager::new(tmp.path().join(".build"));
        let dir = mgr.ensure(&Target::new("uno")).unwrap();
        (tmp, dir)
    }

    fn decision(reason: RebuildReason, changed: &[&str]) -> RebuildDecision {
        RebuildDecision {
            needs_rebuild: true,
            changed: changed.iter().map(|s| s.to_string()).collect(),
            reason,
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let tmp = tempdir().unwrap();
        let mgr = BuildDirectoryManager::new(tmp.path());
        let a = mgr.ensure(&Target::new("uno")).unwrap();
        let b = mgr.ensure(&Target::new("uno")).unwrap();
        assert_eq!(a, b);
        assert!(a.root().is_dir());
    }

    #[test]
    fn test_clean_switch_leaves_only_new_unit() {
        let (tmp, dir) = setup();
        let examples = tmp.path().join("examples");
        let fp = Fingerprinter::default();
        let first = unit(
            &examples,
            "Blink",
            &[("Blink.ino", "void setup(){}"), ("helper.cpp", "void loop(){}")],
        );
        let second = unit(&examples, "Cylon", &[("Cylon.ino", "void setup(){}")]);

        dir.sync_unit(&first, &SyncMode::Full, &fp).unwrap();
        assert_eq!(dir.active_unit().as_deref(), Some("Blink"));

        dir.sync_unit(&second, &SyncMode::CleanSwitch, &fp).unwrap();
        assert_eq!(listing(&dir.src_dir()), BTreeSet::from(["Cylon.ino".to_string()]));
        assert_eq!(dir.active_unit().as_deref(), Some("Cylon"));
    }

    #[test]
    fn test_incremental_copies_and_deletes() {
        let (tmp, dir) = setup();
        let fp = Fingerprinter::default();
        let u = unit(
            &tmp.path().join("examples"),
            "Blink",
            &[("Blink.ino", "v1"), ("old.h", "gone soon")],
        );
        dir.sync_unit(&u, &SyncMode::Full, &fp).unwrap();

        write(&u.dir, "Blink.ino", "v2");
        fs::remove_file(u.dir.join("old.h")).unwrap();
        let changed = BTreeSet::from(["Blink.ino".to_string(), "old.h".to_string()]);
        let report = dir
            .sync_unit(&u, &SyncMode::Incremental(changed), &fp)
            .unwrap();

        assert_eq!(report, SyncReport { copied: 1, removed: 1 });
        assert_eq!(fs::read_to_string(dir.src_dir().join("Blink.ino")).unwrap(), "v2");
        assert!(!dir.src_dir().join("old.h").exists());
    }

    #[test]
    fn test_full_sync_skips_excluded_output() {
        let (tmp, dir) = setup();
        let u = unit(
            &tmp.path().join("examples"),
            "Web",
            &[("Web.ino", "x"), ("fastled_js/index.js", "out")],
        );
        dir.sync_unit(&u, &SyncMode::Full, &Fingerprinter::new(["fastled_js"]))
            .unwrap();
        assert_eq!(listing(&dir.src_dir()), BTreeSet::from(["Web.ino".to_string()]));
    }

    #[test]
    fn test_choose_sync_mode() {
        let changed = decision(RebuildReason::Changed, &["a.ino"]);
        let cold = decision(RebuildReason::ColdStart, &["a.ino"]);

        assert_eq!(
            choose_sync_mode(false, Some("Blink"), "Blink", true, &changed),
            SyncMode::Incremental(BTreeSet::from(["a.ino".to_string()]))
        );
        assert_eq!(
            choose_sync_mode(false, Some("Blink"), "Blink", true, &cold),
            SyncMode::Full
        );
        assert_eq!(
            choose_sync_mode(false, Some("Cylon"), "Blink", true, &changed),
            SyncMode::CleanSwitch
        );
        assert_eq!(
            choose_sync_mode(false, None, "Blink", true, &changed),
            SyncMode::CleanSwitch
        );
        assert_eq!(
            choose_sync_mode(true, Some("Blink"), "Blink", true, &changed),
            SyncMode::CleanSwitch
        );
    }

    #[test]
    fn test_missing_src_forces_full_sync() {
        let changed = decision(RebuildReason::Changed, &["a.ino"]);
        assert_eq!(
            choose_sync_mode(false, Some("Blink"), "Blink", false, &changed),
            SyncMode::Full
        );
    }

    #[test]
    fn test_emptied_src_is_restored_whole() {
        let (tmp, dir) = setup();
        let u = unit(
            &tmp.path().join("examples"),
            "Blink",
            &[("Blink.ino", "v1"), ("extra.h", "#pragma once")],
        );
        let fp = Fingerprinter::default();
        dir.sync_unit(&u, &SyncMode::CleanSwitch, &fp).unwrap();
        assert!(dir.has_sources());

        // src/ wiped behind our back, marker still names Blink.
        fs::remove_dir_all(dir.src_dir()).unwrap();
        fs::create_dir_all(dir.src_dir()).unwrap();
        assert!(!dir.has_sources());
        write(&u.dir, "Blink.ino", "v2");

        let changed = decision(RebuildReason::Changed, &["Blink.ino"]);
        let mode = choose_sync_mode(
            false,
            dir.active_unit().as_deref(),
            "Blink",
            dir.has_sources(),
            &changed,
        );
        assert_eq!(mode, SyncMode::Full);
        dir.sync_unit(&u, &mode, &fp).unwrap();
        assert_eq!(
            listing(&dir.src_dir()),
            BTreeSet::from(["Blink.ino".to_string(), "extra.h".to_string()])
        );
    }

    #[test]
    fn test_prepare_for_init_resets_project_state() {
        let (tmp, dir) = setup();
        write(dir.root(), "platformio.ini", "[env:stale]");
        write(dir.root(), "lib/src/old.cpp", "x");
        write(dir.root(), "boards/stale.json", "{}");
        let boards = tmp.path().join("custom_boards");
        write(&boards, "my_board.json", "{}");

        dir.prepare_for_init(Some(&boards)).unwrap();
        assert!(!dir.project_file().exists());
        assert!(!dir.lib_dir().exists());
        assert_eq!(
            listing(&dir.root().join(BOARDS_DIR)),
            BTreeSet::from(["my_board.json".to_string()])
        );
    }

    #[test]
    fn test_install_libraries_copies_once_unless_refreshed() {
        let (tmp, dir) = setup();
        let lib = tmp.path().join("src");
        write(&lib, "FastLED.h", "v1");
        let libs = vec![lib.clone(), tmp.path().join("missing")];

        assert_eq!(dir.install_libraries(&libs, LibraryInstall::Copy, false).unwrap(), 1);
        write(&lib, "FastLED.h", "v2");
        assert_eq!(dir.install_libraries(&libs, LibraryInstall::Copy, false).unwrap(), 0);
        let installed = dir.lib_dir().join("src/FastLED.h");
        assert_eq!(fs::read_to_string(&installed).unwrap(), "v1");

        assert_eq!(dir.install_libraries(&libs, LibraryInstall::Copy, true).unwrap(), 1);
        assert_eq!(fs::read_to_string(&installed).unwrap(), "v2");
    }

    #[cfg(unix)]
    #[test]
    fn test_install_libraries_link_mode() {
        let (tmp, dir) = setup();
        let lib = tmp.path().join("src");
        write(&lib, "FastLED.h", "v1");
        dir.install_libraries(&[lib.clone()], LibraryInstall::Link, false)
            .unwrap();
        let dst = dir.lib_dir().join("src");
        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());

        write(&lib, "FastLED.h", "v2");
        assert_eq!(fs::read_to_string(dst.join("FastLED.h")).unwrap(), "v2");
    }
}
