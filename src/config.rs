//! `sweep.toml` parsing and the board catalog.
//!
//! ```toml
//! [project]
//! library = "src"
//! examples = "examples"
//! defines = ["FASTLED_TESTING"]
//!
//! [run]
//! timeout_secs = 1800
//! first_build_lock = "auto"
//!
//! [board.esp32dev]
//! platform = "espressif32"
//! defines = ["ESP32_TEST"]
//!
//! [extra_examples]
//! esp32dev = ["EspI2SDemo"]
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use crate::error::SweepError;
use crate::fingerprint::Fingerprinter;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "sweep.toml";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SweepConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub board: BTreeMap<String, BoardConfig>,
    #[serde(default)]
    pub extra_examples: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    root: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProjectConfig {
    #[serde(default = "default_library")]
    pub library: String,
    #[serde(default = "default_examples")]
    pub examples: String,
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
    #[serde(default = "default_libs")]
    pub libs: Vec<String>,
    #[serde(default)]
    pub build_flags: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub default_boards: Vec<String>,
    #[serde(default)]
    pub default_examples: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    pub boards_dir: Option<String>,
    #[serde(default)]
    pub extra_scripts: Vec<String>,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    pub artifact_cache: Option<String>,
    pub customsdk: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            library: default_library(),
            examples: default_examples(),
            build_dir: default_build_dir(),
            libs: default_libs(),
            build_flags: Vec::new(),
            defines: Vec::new(),
            default_boards: Vec::new(),
            default_examples: Vec::new(),
            exclude: default_exclude(),
            boards_dir: None,
            extra_scripts: Vec::new(),
            extra_packages: Vec::new(),
            artifact_cache: None,
            customsdk: None,
        }
    }
}

fn default_library() -> String {
    "src".to_string()
}

fn default_examples() -> String {
    "examples".to_string()
}

fn default_build_dir() -> String {
    ".build".to_string()
}

fn default_libs() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec![".pio".to_string(), "fastled_js".to_string()]
}

/// Whether the seed build of each board is serialized across workers.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "GateSetting")]
pub enum GateMode {
    /// On when running under GitHub Actions.
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GateSetting {
    Flag(bool),
    Word(String),
}

impl TryFrom<GateSetting> for GateMode {
    type Error = String;

    fn try_from(value: GateSetting) -> std::result::Result<Self, Self::Error> {
        match value {
            GateSetting::Flag(true) => Ok(GateMode::On),
            GateSetting::Flag(false) => Ok(GateMode::Off),
            GateSetting::Word(w) => match w.to_ascii_lowercase().as_str() {
                "auto" => Ok(GateMode::Auto),
                "on" | "true" => Ok(GateMode::On),
                "off" | "false" => Ok(GateMode::Off),
                other => Err(format!(
                    "first_build_lock must be \"auto\", true or false, got \"{other}\""
                )),
            },
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LibraryInstall {
    #[default]
    Copy,
    Link,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub workers: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verbose_on_failure: bool,
    #[serde(default)]
    pub parallel_init: bool,
    #[serde(default)]
    pub first_build_lock: GateMode,
    #[serde(default = "default_true")]
    pub two_stage: bool,
    #[serde(default)]
    pub library_install: LibraryInstall,
    #[serde(default = "default_toolchain")]
    pub toolchain: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout_secs: default_timeout_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            verbose_on_failure: true,
            parallel_init: false,
            first_build_lock: GateMode::Auto,
            two_stage: true,
            library_install: LibraryInstall::Copy,
            toolchain: default_toolchain(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_metadata_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_toolchain() -> String {
    "pio".to_string()
}

/// One `[board.<name>]` table as written in the file.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct BoardConfig {
    pub board: Option<String>,
    pub platform: Option<String>,
    pub platform_packages: Option<String>,
    pub framework: Option<String>,
    pub build_core: Option<String>,
    pub filesystem_size: Option<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub customsdk: bool,
    #[serde(default)]
    pub platform_needs_install: bool,
    #[serde(default)]
    pub project_mode: bool,
}

/// A validated, immutable board configuration. Its name keys both the build
/// directory and the cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub board: String,
    pub platform: Option<String>,
    pub platform_packages: Option<String>,
    pub framework: Option<String>,
    pub build_core: Option<String>,
    pub filesystem_size: Option<String>,
    pub defines: Vec<String>,
    pub customsdk: bool,
    pub platform_needs_install: bool,
    pub project_mode: bool,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::from_config(&name, &BoardConfig::default())
    }

    fn from_config(name: &str, cfg: &BoardConfig) -> Self {
        Self {
            name: name.to_string(),
            board: cfg.board.clone().unwrap_or_else(|| name.to_string()),
            platform: cfg.platform.clone(),
            platform_packages: cfg.platform_packages.clone(),
            framework: cfg.framework.clone(),
            build_core: cfg.build_core.clone(),
            filesystem_size: cfg.filesystem_size.clone(),
            defines: cfg.defines.clone(),
            customsdk: cfg.customsdk,
            platform_needs_install: cfg.platform_needs_install,
            project_mode: cfg.project_mode,
        }
    }
}

impl SweepConfig {
    pub fn parse(content: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let mut config: SweepConfig = toml::from_str(content).context(
            "Failed to parse sweep.toml - check for syntax errors (missing quotes, brackets)",
        )?;
        config.root = root.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), SweepError> {
        if self.run.timeout_secs == 0 {
            return Err(SweepError::Config("run.timeout_secs must be positive".into()));
        }
        if self.run.workers == Some(0) {
            return Err(SweepError::Config("run.workers must be at least 1".into()));
        }
        for board in self.extra_examples.keys() {
            if !self.board.contains_key(board) {
                return Err(SweepError::Config(format!(
                    "[extra_examples] names unknown board '{board}'"
                )));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let p = Path::new(rel);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    pub fn library_dir(&self) -> PathBuf {
        self.resolve(&self.project.library)
    }

    pub fn examples_dir(&self) -> PathBuf {
        self.resolve(&self.project.examples)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.resolve(&self.project.build_dir)
    }

    pub fn lib_dirs(&self) -> Vec<PathBuf> {
        self.project.libs.iter().map(|l| self.resolve(l)).collect()
    }

    pub fn boards_dir(&self) -> Option<PathBuf> {
        self.project.boards_dir.as_deref().map(|d| self.resolve(d))
    }

    pub fn extra_scripts(&self) -> Vec<PathBuf> {
        self.project.extra_scripts.iter().map(|s| self.resolve(s)).collect()
    }

    /// Shared compiled-artifact cache handed to the toolchain.
    pub fn artifact_cache_dir(&self) -> PathBuf {
        match &self.project.artifact_cache {
            Some(dir) => self.resolve(dir),
            None => dirs::cache_dir()
                .map(|d| d.join("boardsweep").join("artifacts"))
                .unwrap_or_else(|| self.build_dir().join(".artifacts")),
        }
    }

    pub fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::new(self.project.exclude.iter().cloned())
    }

    pub fn board_names(&self) -> Vec<String> {
        self.board.keys().cloned().collect()
    }

    pub fn target(&self, name: &str) -> std::result::Result<Target, SweepError> {
        self.board
            .get(name)
            .map(|cfg| Target::from_config(name, cfg))
            .ok_or_else(|| SweepError::UnknownTarget(name.to_string()))
    }

    /// Resolve board names, keeping order and dropping repeats.
    pub fn targets(&self, names: &[String]) -> std::result::Result<Vec<Target>, SweepError> {
        let mut seen = std::collections::HashSet::new();
        names
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .map(|n| self.target(n))
            .collect()
    }

    pub fn extra_examples_for(&self, target: &str) -> &[String] {
        self.extra_examples
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Load `sweep.toml` (or the given path).
pub fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "{} not found.\n\n\
            Tip: create one with a [project] table and at least one [board.<name>] table.",
            path.display()
        ));
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {} - check file permissions", path.display()))?;
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    SweepConfig::parse(&content, root)
}

/// Resolved options for one run: file values, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub force_rebuild: bool,
    pub clean_cache: bool,
    pub worker_bound: Option<usize>,
    pub verbose: bool,
    pub verbose_on_failure: bool,
    pub parallel_init: bool,
    pub first_build_gate: bool,
    pub two_stage: bool,
    pub no_install_deps: bool,
    pub library_install: LibraryInstall,
    pub timeout: Duration,
    pub metadata_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_run_config(&RunConfig::default(), |_| None)
    }
}

impl RunOptions {
    /// `env` is a variable lookup, normally `std::env::var(..).ok()`.
    pub fn from_run_config(run: &RunConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let parallel_init = run.parallel_init
            || env("PARALLEL_PROJECT_INITIALIZATION").is_some_and(|v| v.trim() == "1");
        let first_build_gate = match run.first_build_lock {
            GateMode::On => true,
            GateMode::Off => false,
            GateMode::Auto => env("GITHUB_ACTIONS").is_some_and(|v| !v.is_empty()),
        };
        Self {
            force_rebuild: false,
            clean_cache: false,
            worker_bound: run.workers,
            verbose: false,
            verbose_on_failure: run.verbose_on_failure,
            parallel_init,
            first_build_gate,
            two_stage: run.two_stage,
            no_install_deps: false,
            library_install: run.library_install,
            timeout: Duration::from_secs(run.timeout_secs),
            metadata_timeout: Duration::from_secs(run.metadata_timeout_secs),
        }
    }

    pub fn from_env(run: &RunConfig) -> Self {
        Self::from_run_config(run, |k| std::env::var(k).ok())
    }
}
