//! PlatformIO (`pio`) command construction.

use super::ToolchainInvoker;
use super::process::{Echo, run_streamed};
use super::types::{CompileRequest, InitRequest, Invocation, Stage, ToolOutput};
use crate::config::Target;
use crate::error::Result;
use crate::ui::Reporter;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct PlatformIo {
    program: String,
    timeout: Duration,
    metadata_timeout: Duration,
    artifact_cache: Option<PathBuf>,
    echo: Echo,
    reporter: Reporter,
}

impl PlatformIo {
    pub fn new(program: impl Into<String>, reporter: Reporter) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(1800),
            metadata_timeout: Duration::from_secs(60),
            artifact_cache: None,
            echo: Echo::Essential,
            reporter,
        }
    }

    pub fn with_timeouts(mut self, build: Duration, metadata: Duration) -> Self {
        self.timeout = build;
        self.metadata_timeout = metadata;
        self
    }

    /// Shared compiled-artifact cache passed as `build_cache_dir`.
    pub fn with_artifact_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_cache = Some(dir.into());
        self
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    fn command(&self) -> Invocation {
        Invocation::new(self.program.clone())
    }

    /// `pio pkg install -g -p <platform>`, for boards whose platform is not preinstalled.
    pub fn install_invocation(&self, platform: &str) -> Invocation {
        self.command()
            .args(["pkg", "install", "-g", "-p"])
            .arg(platform)
    }

    pub fn init_invocation(&self, req: &InitRequest<'_>) -> Invocation {
        let target = req.target;
        let mut inv = self
            .command()
            .args(["project", "init", "--project-dir"])
            .arg(path_arg(req.build_dir))
            .arg("--board")
            .arg(target.board.clone());

        let opt = |key: &str, value: &str| format!("--project-option={key}={value}");
        if let Some(p) = &target.platform {
            inv = inv.arg(opt("platform", p));
        }
        if let Some(p) = &target.platform_packages {
            inv = inv.arg(opt("platform_packages", p));
        }
        if let Some(f) = &target.framework {
            inv = inv.arg(opt("framework", f));
        }
        if let Some(c) = &target.build_core {
            inv = inv.arg(opt("board_build.core", c));
        }
        if let Some(s) = &target.filesystem_size {
            inv = inv.arg(opt("board_build.filesystem_size", s));
        }
        for flag in req.build_flags {
            inv = inv.arg(opt("build_flags", flag));
        }

        let defines = merged_defines(req.defines, &target.defines);
        if !defines.is_empty() {
            let flags: Vec<String> = defines.iter().map(|d| format!("-D{d}")).collect();
            inv = inv.arg(opt("build_flags", &flags.join(" ")));
        }
        if target.customsdk
            && let Some(sdk) = req.customsdk
        {
            inv = inv.arg(opt("custom_sdkconfig", sdk));
        }
        if !req.extra_packages.is_empty() {
            inv = inv.arg(opt("lib_deps", &req.extra_packages.join(",")));
        }
        if !req.extra_scripts.is_empty() {
            let scripts: Vec<String> = req
                .extra_scripts
                .iter()
                .map(|s| {
                    let s = path_arg(s);
                    if s.starts_with("pre:") { s } else { format!("pre:{s}") }
                })
                .collect();
            inv = inv.arg(opt("extra_scripts", &format!("[{}]", scripts.join(","))));
        }
        if req.no_install_deps {
            inv = inv.arg("--no-install-dependencies");
        }
        inv
    }

    pub fn compile_invocation(&self, req: &CompileRequest<'_>) -> Invocation {
        let mut inv = if req.target.project_mode {
            self.command().arg("run").current_dir(req.build_dir)
        } else {
            let mut inv = self
                .command()
                .arg("ci")
                .arg(path_arg(&req.unit.entry_path()))
                .arg("--board")
                .arg(req.target.board.clone());
            for lib in req.libs.iter().chain(&req.unit.extra_libs) {
                inv = inv.arg(format!("--lib={}", path_arg(lib)));
            }
            inv.arg("--keep-build-dir")
                .arg(format!("--build-dir={}", path_arg(req.build_dir)))
                .arg(format!(
                    "--project-conf={}",
                    path_arg(&req.build_dir.join("platformio.ini"))
                ))
        };

        // `pio run` takes no project options; only the seed flag applies there.
        match (req.stage, req.target.project_mode) {
            (Stage::Seed, _) => inv = inv.arg("--disable-auto-clean"),
            (Stage::Batch, false) => inv = inv.arg("--project-option=lib_ldf_mode=chain"),
            _ => {}
        }
        if req.stage != Stage::Standalone
            && !req.target.project_mode
            && let Some(cache) = &self.artifact_cache
        {
            inv = inv.arg(format!("--project-option=build_cache_dir={}", path_arg(cache)));
        }
        if req.verbose {
            inv = inv.arg("-v");
        }
        inv
    }

    pub fn metadata_invocation(&self, build_dir: &Path) -> Invocation {
        self.command()
            .args(["project", "metadata", "--json-output"])
            .current_dir(build_dir)
    }
}

impl ToolchainInvoker for PlatformIo {
    fn init_project(&self, req: &InitRequest<'_>) -> Result<ToolOutput> {
        if req.target.platform_needs_install {
            match &req.target.platform {
                Some(platform) => {
                    let out = run_streamed(
                        &self.install_invocation(platform),
                        self.timeout,
                        self.echo,
                        &self.reporter,
                    )?;
                    if !out.success() {
                        return Ok(out);
                    }
                }
                None => tracing::warn!(
                    "board '{}' asks for a platform install but names no platform",
                    req.target.name
                ),
            }
        }
        let inv = self.init_invocation(req);
        self.reporter.step(format!("Running: {}", inv.display()));
        run_streamed(&inv, self.timeout, self.echo, &self.reporter)
    }

    fn compile(&self, req: &CompileRequest<'_>) -> Result<ToolOutput> {
        let inv = self.compile_invocation(req);
        self.reporter.step(format!("Running: {}", inv.display()));
        let echo = if req.verbose { Echo::All } else { self.echo };
        run_streamed(&inv, self.timeout, echo, &self.reporter)
    }

    fn metadata(&self, _target: &Target, build_dir: &Path) -> Result<ToolOutput> {
        run_streamed(
            &self.metadata_invocation(build_dir),
            self.metadata_timeout,
            Echo::Silent,
            &self.reporter,
        )
    }
}

/// Global defines first, then board defines not already present.
pub fn merged_defines(global: &[String], board: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for d in global.iter().chain(board) {
        if !out.contains(d) {
            out.push(d.clone());
        }
    }
    out
}

/// Forward slashes on every platform; the toolchain accepts them everywhere.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
