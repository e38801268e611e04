//! Shared fixtures for the orchestration tests: a throwaway library project
//! and a toolchain that records calls instead of compiling.

#![allow(dead_code)]

use boardsweep::build::{
    BuildContext, BuildDirectoryManager, BuildPlan, InitSettings, Orchestrator, RunReport,
};
use boardsweep::cache::BuildCacheStore;
use boardsweep::config::{RunOptions, Target};
use boardsweep::error::Result;
use boardsweep::fingerprint::Fingerprinter;
use boardsweep::toolchain::{
    CompileRequest, ExitKind, InitRequest, Stage, ToolOutput, ToolchainInvoker,
};
use boardsweep::ui::Reporter;
use boardsweep::unit::{BuildUnit, resolve_units};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCall {
    pub target: String,
    pub unit: String,
    pub stage: Stage,
    pub verbose: bool,
}

#[derive(Default)]
pub struct FakeToolchain {
    pub inits: Mutex<Vec<String>>,
    pub compiles: Mutex<Vec<CompileCall>>,
    /// (board, example) pairs whose compile exits 1.
    pub failing: HashSet<(String, String)>,
    pub failing_init: HashSet<String>,
    /// How long each successful compile takes. Failures return at once.
    pub delay: Duration,
    seeds_running: AtomicUsize,
    seeds_peak: AtomicUsize,
}

impl FakeToolchain {
    pub fn failing(pairs: &[(&str, &str)]) -> Self {
        Self {
            failing: pairs
                .iter()
                .map(|(t, u)| (t.to_string(), u.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Most seed compiles that were ever in flight at the same time.
    pub fn peak_concurrent_seeds(&self) -> usize {
        self.seeds_peak.load(Ordering::SeqCst)
    }

    pub fn compiled(&self) -> Vec<CompileCall> {
        self.compiles.lock().unwrap().clone()
    }

    pub fn compiled_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .compiled()
            .into_iter()
            .filter(|c| !c.verbose)
            .map(|c| (c.target, c.unit))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn reset(&self) {
        self.compiles.lock().unwrap().clear();
        self.inits.lock().unwrap().clear();
    }
}

impl ToolchainInvoker for FakeToolchain {
    fn init_project(&self, req: &InitRequest<'_>) -> Result<ToolOutput> {
        self.inits.lock().unwrap().push(req.target.name.clone());
        if self.failing_init.contains(&req.target.name) {
            return Ok(ToolOutput::synthetic(
                ExitKind::Failed(1),
                "Error: Unknown board ID",
            ));
        }
        fs::write(req.build_dir.join("platformio.ini"), "[env]\n").unwrap();
        Ok(ToolOutput::synthetic(ExitKind::Success, "Project has been initialized"))
    }

    fn compile(&self, req: &CompileRequest<'_>) -> Result<ToolOutput> {
        self.compiles.lock().unwrap().push(CompileCall {
            target: req.target.name.clone(),
            unit: req.unit.name.clone(),
            stage: req.stage,
            verbose: req.verbose,
        });
        let key = (req.target.name.clone(), req.unit.name.clone());
        if self.failing.contains(&key) {
            return Ok(ToolOutput::synthetic(
                ExitKind::Failed(1),
                "src/main.cpp:1: error: 'CRGB' was not declared in this scope\n*** [FAILED]",
            ));
        }

        let seed = req.stage == Stage::Seed;
        if seed {
            let running = self.seeds_running.fetch_add(1, Ordering::SeqCst) + 1;
            self.seeds_peak.fetch_max(running, Ordering::SeqCst);
        }
        std::thread::sleep(self.delay);
        if seed {
            self.seeds_running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(ToolOutput::synthetic(ExitKind::Success, "RAM: 10%\nFlash: 20%\n[SUCCESS]"))
    }

    fn metadata(&self, _target: &Target, _build_dir: &Path) -> Result<ToolOutput> {
        Ok(ToolOutput::synthetic(
            ExitKind::Success,
            r#"{"env": {"cc_path": "/toolchain/bin/avr-gcc"}}"#,
        ))
    }
}

/// A library with `src/` and one sketch per example name.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new(examples: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let lib = src.join("lib.cpp");
        fs::write(&lib, "int lib_value = 1;\n").unwrap();
        // Older than any cache file written later.
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&lib)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let project = Self { dir };
        for name in examples {
            project.write(name, &format!("{name}.ino"), "void setup() {}\nvoid loop() {}\n");
        }
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn examples_dir(&self) -> PathBuf {
        self.root().join("examples")
    }

    pub fn build_root(&self) -> PathBuf {
        self.root().join(".build")
    }

    pub fn write(&self, example: &str, file: &str, content: &str) {
        let dir = self.examples_dir().join(example);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    pub fn units(&self, names: &[&str]) -> Vec<BuildUnit> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        resolve_units(&self.examples_dir(), &names).unwrap()
    }

    pub fn plan(&self, boards: &[&str], examples: &[&str]) -> BuildPlan {
        BuildPlan {
            targets: boards.iter().map(|b| Target::new(*b)).collect(),
            units: self.units(examples),
            extra_units: Default::default(),
        }
    }

    /// Run `plan` once through the orchestrator with `toolchain`.
    pub fn run(
        &self,
        toolchain: &FakeToolchain,
        plan: &BuildPlan,
        options: &RunOptions,
    ) -> Result<RunReport> {
        self.run_with(toolchain, plan, options, &InitSettings::default())
    }

    /// Same as [`Project::run`] with explicit project-init settings.
    pub fn run_with(
        &self,
        toolchain: &FakeToolchain,
        plan: &BuildPlan,
        options: &RunOptions,
        init: &InitSettings,
    ) -> Result<RunReport> {
        let fingerprinter = Fingerprinter::default();
        let libs = vec![self.root().join("src")];
        let dirs = BuildDirectoryManager::new(self.build_root());
        let cache = BuildCacheStore::new(self.build_root(), libs.clone(), fingerprinter.clone());
        let reporter = Reporter::quiet();
        let ctx = BuildContext {
            toolchain,
            dirs: &dirs,
            cache: &cache,
            fingerprinter: &fingerprinter,
            libs: &libs,
            init,
            options,
            reporter: &reporter,
        };
        Orchestrator::new(ctx).run(plan)
    }
}

pub fn options(workers: usize) -> RunOptions {
    RunOptions {
        worker_bound: Some(workers),
        verbose_on_failure: false,
        first_build_gate: false,
        parallel_init: false,
        ..RunOptions::default()
    }
}
