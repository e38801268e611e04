//! What one worker does for one board: project init, and the example sequence.

use super::directory::{BuildDirectory, BuildDirectoryManager, choose_sync_mode};
use super::feedback::FeedbackAnalyzer;
use super::optimizer::{SequenceSummary, TwoStageOptimizer, UnitReport, UnitStatus};
use super::orchestrator::RunState;
use crate::cache::BuildCacheStore;
use crate::config::{RunOptions, Target};
use crate::error::{Result, SweepError};
use crate::fingerprint::Fingerprinter;
use crate::toolchain::metadata::{MetadataWrite, write_build_info};
use crate::toolchain::platformio::merged_defines;
use crate::toolchain::{CompileRequest, ExitKind, InitRequest, Stage, ToolOutput, ToolchainInvoker};
use crate::ui::Reporter;
use crate::unit::BuildUnit;
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::path::PathBuf;
use std::time::Instant;

const VERBOSE_RERUN_NOTE: &str =
    "This is a second attempt with verbose output, look above for compiler errors.";

/// Project-init inputs shared by every board.
#[derive(Debug, Clone, Default)]
pub struct InitSettings {
    pub defines: Vec<String>,
    pub build_flags: Vec<String>,
    pub extra_packages: Vec<String>,
    pub extra_scripts: Vec<PathBuf>,
    pub customsdk: Option<String>,
    pub boards_dir: Option<PathBuf>,
}

impl InitSettings {
    /// Digest of everything init writes into `target`'s project file. Cache
    /// entries built under a different digest are stale.
    pub fn config_digest(&self, target: &Target) -> String {
        let scripts: Vec<String> = self
            .extra_scripts
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let customsdk = if target.customsdk { self.customsdk.as_deref() } else { None };
        let fields = [
            ("board", target.board.clone()),
            ("platform", target.platform.clone().unwrap_or_default()),
            ("platform_packages", target.platform_packages.clone().unwrap_or_default()),
            ("framework", target.framework.clone().unwrap_or_default()),
            ("build_core", target.build_core.clone().unwrap_or_default()),
            ("filesystem_size", target.filesystem_size.clone().unwrap_or_default()),
            ("project_mode", target.project_mode.to_string()),
            ("defines", merged_defines(&self.defines, &target.defines).join("\n")),
            ("build_flags", self.build_flags.join("\n")),
            ("lib_deps", self.extra_packages.join("\n")),
            ("extra_scripts", scripts.join("\n")),
            ("customsdk", customsdk.unwrap_or_default().to_string()),
        ];

        let mut hasher = Sha256::new();
        for (name, value) in fields {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Read-only collaborators shared by all workers.
pub struct BuildContext<'a> {
    pub toolchain: &'a dyn ToolchainInvoker,
    pub dirs: &'a BuildDirectoryManager,
    pub cache: &'a BuildCacheStore,
    pub fingerprinter: &'a Fingerprinter,
    /// Library trees every example is compiled against.
    pub libs: &'a [PathBuf],
    pub init: &'a InitSettings,
    pub options: &'a RunOptions,
    pub reporter: &'a Reporter,
}

/// Why a board's project init failed.
#[derive(Debug, Clone)]
pub struct InitFailure {
    pub target: String,
    pub message: String,
    pub log: String,
}

/// Ensure the board's directory and regenerate its project configuration.
pub fn init_target(ctx: &BuildContext<'_>, target: &Target) -> std::result::Result<(), InitFailure> {
    let fail = |message: String, log: String| InitFailure {
        target: target.name.clone(),
        message,
        log,
    };
    ctx.reporter
        .step(format!("Initializing environment for {}", target.name));

    let dir = ctx
        .dirs
        .ensure(target)
        .and_then(|dir| dir.prepare_for_init(ctx.init.boards_dir.as_deref()).map(|_| dir))
        .map_err(|e| fail(e.to_string(), String::new()))?;

    let req = InitRequest {
        target,
        build_dir: dir.root(),
        defines: &ctx.init.defines,
        build_flags: &ctx.init.build_flags,
        extra_packages: &ctx.init.extra_packages,
        extra_scripts: &ctx.init.extra_scripts,
        customsdk: ctx.init.customsdk.as_deref(),
        no_install_deps: ctx.options.no_install_deps,
    };
    let out = ctx
        .toolchain
        .init_project(&req)
        .map_err(|e| fail(e.to_string(), String::new()))?;
    if !out.success() {
        return Err(fail(describe_exit(&out), out.log()));
    }

    write_metadata(ctx, target, &dir);
    ctx.reporter
        .success(format!("Initialized {} in {}", target.name, dir.root().display()));
    Ok(())
}

/// Metadata is informational; every failure here is only a warning.
fn write_metadata(ctx: &BuildContext<'_>, target: &Target, dir: &BuildDirectory) {
    match ctx.toolchain.metadata(target, dir.root()) {
        Ok(out) if out.success() => match write_build_info(dir.root(), &out.stdout()) {
            Ok(MetadataWrite::Parsed(path)) => {
                tracing::debug!("wrote build metadata {}", path.display())
            }
            Ok(MetadataWrite::Raw(path)) => ctx.reporter.warn(format!(
                "Metadata for {} was not valid JSON, saved raw to {}",
                target.name,
                path.display()
            )),
            Err(e) => ctx.reporter.warn(format!("Could not write metadata: {e}")),
        },
        Ok(out) => ctx.reporter.warn(format!(
            "Metadata generation for {} {}",
            target.name,
            describe_exit(&out)
        )),
        Err(e) => ctx.reporter.warn(format!("Metadata generation failed: {e}")),
    }
}

pub fn describe_exit(out: &ToolOutput) -> String {
    match out.exit {
        ExitKind::Success => "succeeded".to_string(),
        ExitKind::Failed(code) => format!("failed with exit code {code}"),
        ExitKind::TimedOut => format!("timed out after {:.0}s", out.elapsed.as_secs_f64()),
    }
}

/// Build `units` in order for `target`, seeding first.
///
/// The first failing unit raises the run-wide failure flag at once, so other
/// boards stop taking new examples. This board's own batch is not cancelled by
/// its own failure.
pub fn build_target(
    ctx: &BuildContext<'_>,
    state: &RunState,
    target: &Target,
    units: &[BuildUnit],
) -> SequenceSummary {
    let dir = ctx.dirs.dir_for(target);
    let config = ctx.init.config_digest(target);
    let own_failure = Cell::new(false);
    let mut optimizer = TwoStageOptimizer::new(ctx.options.two_stage);
    let summary = optimizer.run(
        units,
        |unit, stage| {
            let started = Instant::now();
            let report = match build_unit(ctx, state, target, &dir, &config, unit, stage) {
                Ok(report) => report,
                Err(e) => {
                    ctx.reporter
                        .error(format!("{} / {}: {}", target.name, unit.name, e));
                    UnitReport::failed(&unit.name, started.elapsed(), String::new(), e.to_string())
                }
            };
            if report.is_failure() && !own_failure.replace(true) {
                state.fail();
            }
            report
        },
        || state.has_failed() && !own_failure.get(),
    );

    ctx.reporter.line(format!(
        "*** {}: seed {:.2}s, batch {:.2}s, {} built, {} up to date ***",
        target.name,
        summary.seed_elapsed.as_secs_f64(),
        summary.batch_elapsed.as_secs_f64(),
        summary.built(),
        summary.count(UnitStatus::UpToDate)
    ));
    summary
}

fn build_unit(
    ctx: &BuildContext<'_>,
    state: &RunState,
    target: &Target,
    dir: &BuildDirectory,
    config: &str,
    unit: &BuildUnit,
    stage: Stage,
) -> Result<UnitReport> {
    let force = ctx.options.force_rebuild;
    let fingerprint = ctx.fingerprinter.fingerprint(&unit.dir)?;
    for path in fingerprint.low_confidence_paths() {
        tracing::warn!("{}: {} fingerprinted by mtime only", unit.name, path);
    }

    let decision = ctx
        .cache
        .needs_rebuild(&target.name, &unit.name, &fingerprint, config);
    if !force && !decision.needs_rebuild {
        ctx.reporter
            .success(format!("{} / {}: up to date", target.name, unit.name));
        return Ok(UnitReport::up_to_date(&unit.name));
    }

    let mode = choose_sync_mode(
        force,
        dir.active_unit().as_deref(),
        &unit.name,
        dir.has_sources(),
        &decision,
    );
    let synced = dir.sync_unit(unit, &mode, ctx.fingerprinter)?;
    tracing::debug!(
        "{}/{}: {} ({} copied, {} removed)",
        target.name,
        unit.name,
        mode,
        synced.copied,
        synced.removed
    );

    if target.project_mode {
        let refresh = force || decision.is_full();
        dir.install_libraries(ctx.libs, ctx.options.library_install, refresh)?;
    }

    let req = CompileRequest {
        target,
        unit,
        build_dir: dir.root(),
        libs: ctx.libs,
        stage,
        verbose: ctx.options.verbose,
    };
    ctx.reporter.step(format!(
        "Building {} for {} ({stage}, {mode})",
        unit.name, target.name
    ));

    let out = {
        let _gate = (stage == Stage::Seed).then(|| state.seed_gate()).flatten();
        ctx.toolchain.compile(&req)?
    };

    if out.success() {
        if let Err(e) = ctx.cache.update(&target.name, &unit.name, &fingerprint, config) {
            ctx.reporter
                .warn(format!("Could not update build cache for {}: {e}", unit.name));
        }
        ctx.reporter.success(format!(
            "Finished {} for {} in {:.2}s",
            unit.name,
            target.name,
            out.elapsed.as_secs_f64()
        ));
        return Ok(UnitReport::built(&unit.name, out.elapsed, out.log()));
    }

    ctx.reporter.error(format!(
        "Error compiling {} for {}: {}",
        unit.name,
        target.name,
        describe_exit(&out)
    ));
    let mut report = UnitReport::failed(&unit.name, out.elapsed, out.log(), describe_exit(&out));
    report.hint = FeedbackAnalyzer::analyze(&report.log);

    if ctx.options.verbose_on_failure && !req.verbose && state.claim_diagnostic() {
        report.diagnostic = Some(verbose_rerun(ctx, state, &req));
    }
    Ok(report)
}

/// Re-run the failing compile once with verbose output.
fn verbose_rerun(ctx: &BuildContext<'_>, state: &RunState, req: &CompileRequest<'_>) -> String {
    ctx.reporter.warn(format!(
        "Re-running {} for {} with verbose output",
        req.unit.name, req.target.name
    ));
    let log = match ctx.toolchain.compile(&req.verbose()) {
        Ok(out) => format!("{}\n\n{VERBOSE_RERUN_NOTE}\n", out.log()),
        Err(e) => format!("verbose re-run could not start: {e}"),
    };
    state.record_diagnostic(&req.target.name, &req.unit.name, &log);
    log
}

/// Make sure every unit exists before anything runs.
pub fn check_units(units: &[BuildUnit]) -> Result<()> {
    for unit in units {
        if !unit.entry_path().is_file() {
            return Err(SweepError::MissingEntry {
                unit: unit.name.clone(),
                dir: unit.dir.clone(),
            });
        }
    }
    Ok(())
}
