//! Build command handler
//!
//! Turns `bsweep build` arguments into a [`BuildPlan`], runs it through the
//! orchestrator against PlatformIO, and prints the run summary.

use anyhow::{Context, Result, bail};
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::build::{
    BuildContext, BuildDirectoryManager, BuildPlan, InitSettings, Orchestrator, RunReport,
    TargetOutcome, UnitStatus,
};
use crate::cache::BuildCacheStore;
use crate::config::{RunOptions, SweepConfig};
use crate::toolchain::{Echo, PlatformIo};
use crate::ui::{self, Reporter, Table};
use crate::unit::{discover_units, resolve_units, select_units};

use super::boards::select_boards;

/// Everything `bsweep build` accepts on the command line.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub boards: Vec<String>,
    pub examples: Vec<String>,
    pub exclude_examples: Vec<String>,
    pub defines: Vec<String>,
    pub force_rebuild: bool,
    pub clean_cache: bool,
    pub workers: Option<usize>,
    pub verbose: bool,
    pub build_dir: Option<PathBuf>,
    pub skip_init: bool,
    pub interactive: bool,
    pub no_verbose_on_failure: bool,
}

impl BuildRequest {
    /// File and environment settings, overridden by flags.
    pub fn options(&self, config: &SweepConfig) -> RunOptions {
        let mut options = RunOptions::from_env(&config.run);
        options.force_rebuild = self.force_rebuild;
        options.clean_cache = self.clean_cache;
        options.verbose = self.verbose;
        options.no_install_deps = self.skip_init;
        if self.workers.is_some() {
            options.worker_bound = self.workers;
        }
        if self.no_verbose_on_failure {
            options.verbose_on_failure = false;
        }
        options
    }
}

/// Resolve boards and examples into a plan. Unknown boards and missing
/// examples fail here, before anything runs.
pub fn plan(config: &SweepConfig, boards: &[String], request: &BuildRequest) -> Result<BuildPlan> {
    if boards.is_empty() {
        bail!("No boards selected. Pass --boards, use --interactive, or set [project].default_boards");
    }
    let targets = config.targets(boards)?;

    let examples_dir = config.examples_dir();
    let requested = if !request.examples.is_empty() {
        request.examples.clone()
    } else if !config.project.default_examples.is_empty() {
        config.project.default_examples.clone()
    } else {
        discover_units(&examples_dir)?
    };
    let names = select_units(&requested, &request.exclude_examples);
    if names.is_empty() {
        bail!("No examples selected in {}", examples_dir.display());
    }
    let units = resolve_units(&examples_dir, &names)?;

    let mut extra_units = BTreeMap::new();
    for target in &targets {
        let extra = select_units(config.extra_examples_for(&target.name), &request.exclude_examples);
        if !extra.is_empty() {
            extra_units.insert(target.name.clone(), resolve_units(&examples_dir, &extra)?);
        }
    }

    Ok(BuildPlan {
        targets,
        units,
        extra_units,
    })
}

pub fn run_build(config: &SweepConfig, request: &BuildRequest) -> Result<RunReport> {
    let boards = if !request.boards.is_empty() {
        request.boards.clone()
    } else if request.interactive {
        select_boards(config)?
    } else {
        config.project.default_boards.clone()
    };
    let plan = plan(config, &boards, request)?;
    let options = request.options(config);

    let build_root = request.build_dir.clone().unwrap_or_else(|| config.build_dir());
    let fingerprinter = config.fingerprinter();
    let libs = config.lib_dirs();
    let dirs = BuildDirectoryManager::new(&build_root);
    let cache = BuildCacheStore::new(&build_root, libs.clone(), fingerprinter.clone());

    let mut defines = config.project.defines.clone();
    defines.extend(request.defines.iter().cloned());
    let init = InitSettings {
        defines,
        build_flags: config.project.build_flags.clone(),
        extra_packages: config.project.extra_packages.clone(),
        extra_scripts: config.extra_scripts(),
        customsdk: config.project.customsdk.clone(),
        boards_dir: config.boards_dir(),
    };

    print_header(&plan, &options, &build_root);

    let reporter = Reporter::auto(plan.targets.len() as u64);
    let toolchain = PlatformIo::new(config.run.toolchain.clone(), reporter.clone())
        .with_timeouts(options.timeout, options.metadata_timeout)
        .with_artifact_cache(config.artifact_cache_dir())
        .with_echo(if options.verbose { Echo::All } else { Echo::Essential });

    let ctx = BuildContext {
        toolchain: &toolchain,
        dirs: &dirs,
        cache: &cache,
        fingerprinter: &fingerprinter,
        libs: &libs,
        init: &init,
        options: &options,
        reporter: &reporter,
    };
    let report = Orchestrator::new(ctx)
        .run(&plan)
        .context("Build aborted before any board was compiled")?;
    reporter.finish("done");

    print_summary(&plan, &report);
    Ok(report)
}

fn print_header(plan: &BuildPlan, options: &RunOptions, build_root: &std::path::Path) {
    let names: Vec<&str> = plan.targets.iter().map(|t| t.name.as_str()).collect();
    let units: Vec<&str> = plan.units.iter().map(|u| u.name.as_str()).collect();
    println!("{} {}", "⚡".yellow(), "Build Plan".bold());
    println!("{}", "─".repeat(50).dimmed());
    println!("   Boards:       {}", names.join(", ").cyan());
    println!("   Examples:     {}", units.join(", ").cyan());
    println!("   Combinations: {}", plan.combinations());
    println!(
        "   Mode:         {}",
        if options.force_rebuild { "full rebuild" } else { "incremental" }
    );
    println!("   Build dir:    {}", build_root.display());
    println!();
}

pub fn summary_table(report: &RunReport) -> Table {
    let mut table = Table::new(&["Board", "Result", "Built", "Up to date", "Skipped", "Time"]);
    for target in &report.targets {
        let result = match target.outcome {
            TargetOutcome::Succeeded => "ok".green().to_string(),
            TargetOutcome::Failed => "FAILED".red().bold().to_string(),
            TargetOutcome::Cancelled => "cancelled".yellow().to_string(),
        };
        let skipped = target
            .summary
            .units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Skipped(_)))
            .count();
        table.add_row(vec![
            target.target.clone(),
            result,
            target.summary.built().to_string(),
            target.summary.count(UnitStatus::UpToDate).to_string(),
            skipped.to_string(),
            ui::format_duration(target.elapsed.as_secs_f64()),
        ]);
    }
    table
}

fn print_summary(plan: &BuildPlan, report: &RunReport) {
    println!();
    if let Some(failure) = &report.init_failure {
        println!(
            "{} Initialization failed for {}: {}",
            "x".red(),
            failure.target.bold(),
            failure.message
        );
        if !failure.log.is_empty() {
            println!("{}", failure.log);
        }
        return;
    }

    summary_table(report).print();

    let total = report.elapsed.as_secs_f64();
    let combinations = plan.combinations().max(1);
    println!(
        "   {} boards × examples in {} ({} per combination, {} workers)",
        plan.combinations(),
        ui::format_duration(total),
        ui::format_duration(total / combinations as f64),
        report.workers
    );

    for target in report.failed_targets() {
        for unit in target.summary.units.iter().filter(|u| u.is_failure()) {
            println!(
                "{} {} / {}: {}",
                "x".red(),
                target.target.bold(),
                unit.unit,
                unit.message.as_deref().unwrap_or("failed")
            );
            if let Some(hint) = &unit.hint {
                println!("{} {}", "💡".yellow(), hint);
            }
        }
    }

    if let Some(diag) = &report.diagnostic {
        println!();
        println!(
            "{} Verbose log for {} / {}:",
            "→".blue(),
            diag.target.bold(),
            diag.unit
        );
        println!("{}", diag.log);
    }

    if report.success() {
        println!("{} All builds succeeded.", "✓".green());
    }
}
