//! Board × example scheduling.
//!
//! A run has two phases:
//!
//! 1. **Init**: every board's project is (re)generated. One worker by default;
//!    any failure aborts the whole run and cancels inits not yet started.
//! 2. **Build**: one task per board on a bounded pool. Examples of one board
//!    run strictly in order on the worker that owns the board. The first failed
//!    example raises a shared flag; workers poll it before each board and each
//!    example, so running compiles finish but nothing new starts. The failing
//!    board itself finishes its batch.
//!
//! Tasks are dispatched in FIFO order with `rayon::scope_fifo`, so boards start
//! in the order they were requested.

use super::optimizer::{SequenceSummary, SkipReason, UnitStatus};
use super::pipeline::{BuildContext, InitFailure, build_target, check_units, init_target};
use crate::config::Target;
use crate::error::Result;
use crate::unit::BuildUnit;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, mpsc};
use std::time::{Duration, Instant};

const MAX_INIT_WORKERS: usize = 4;

/// The verbose re-run log of the first diagnosed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub target: String,
    pub unit: String,
    pub log: String,
}

/// Process-wide state shared by every worker in one run.
pub struct RunState {
    failed: AtomicBool,
    seed_gate: Option<Mutex<()>>,
    diagnostic_claimed: AtomicBool,
    diagnostic: Mutex<Option<Diagnostic>>,
}

impl RunState {
    /// `seed_gate` serializes seed builds across boards to bound peak memory.
    pub fn new(seed_gate: bool) -> Self {
        Self {
            failed: AtomicBool::new(false),
            seed_gate: seed_gate.then(|| Mutex::new(())),
            diagnostic_claimed: AtomicBool::new(false),
            diagnostic: Mutex::new(None),
        }
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Held for the duration of a seed build when the gate is enabled.
    pub fn seed_gate(&self) -> Option<MutexGuard<'_, ()>> {
        self.seed_gate
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// True for exactly one caller per run.
    pub fn claim_diagnostic(&self) -> bool {
        self.diagnostic_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn record_diagnostic(&self, target: &str, unit: &str, log: &str) {
        let mut slot = self
            .diagnostic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Diagnostic {
            target: target.to_string(),
            unit: unit.to_string(),
            log: log.to_string(),
        });
    }

    pub fn diagnostic(&self) -> Option<Diagnostic> {
        self.diagnostic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// What to build.
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub targets: Vec<Target>,
    pub units: Vec<BuildUnit>,
    /// Extra examples for specific boards, appended after the common ones.
    pub extra_units: BTreeMap<String, Vec<BuildUnit>>,
}

impl BuildPlan {
    pub fn units_for(&self, target: &Target) -> Vec<BuildUnit> {
        let mut units = self.units.clone();
        if let Some(extra) = self.extra_units.get(&target.name) {
            for unit in extra {
                if !units.iter().any(|u| u.name == unit.name) {
                    units.push(unit.clone());
                }
            }
        }
        units
    }

    pub fn combinations(&self) -> usize {
        self.targets.iter().map(|t| self.units_for(t).len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Succeeded,
    Failed,
    /// Stopped early, or never started, because another board failed.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: String,
    pub outcome: TargetOutcome,
    pub summary: SequenceSummary,
    pub elapsed: Duration,
}

impl TargetReport {
    fn cancelled(target: &Target) -> Self {
        Self {
            target: target.name.clone(),
            outcome: TargetOutcome::Cancelled,
            summary: SequenceSummary::default(),
            elapsed: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub init_failure: Option<InitFailure>,
    pub targets: Vec<TargetReport>,
    pub diagnostic: Option<Diagnostic>,
    pub workers: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.init_failure.is_none()
            && self
                .targets
                .iter()
                .all(|t| t.outcome == TargetOutcome::Succeeded)
    }

    pub fn failed_targets(&self) -> Vec<&TargetReport> {
        self.targets
            .iter()
            .filter(|t| t.outcome == TargetOutcome::Failed)
            .collect()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.targets.iter().map(|t| t.summary.count(status)).sum()
    }

    /// (board, example) pairs the toolchain actually compiled, in board order.
    pub fn compiled(&self) -> Vec<(String, String)> {
        self.targets
            .iter()
            .flat_map(|t| {
                t.summary
                    .units
                    .iter()
                    .filter(|u| u.ran_toolchain())
                    .map(|u| (t.target.clone(), u.unit.clone()))
            })
            .collect()
    }
}

/// Pool size for the build phase: half the cores by default, an explicit
/// bound when given, never more than the number of boards.
pub fn build_workers(bound: Option<usize>, targets: usize) -> usize {
    let targets = targets.max(1);
    match bound {
        Some(bound) => bound.clamp(1, targets),
        None => {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cpus / 2).clamp(1, targets)
        }
    }
}

pub fn init_workers(parallel: bool, targets: usize) -> usize {
    if parallel {
        targets.clamp(1, MAX_INIT_WORKERS)
    } else {
        1
    }
}

/// Run `task` over `items` on a FIFO pool of `workers` threads. Results come
/// back over a channel and are returned in item order.
fn run_pool<T, R, F>(workers: usize, items: &[T], task: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let (tx, rx) = mpsc::channel();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("bsweep-worker-{i}"))
        .build();

    match pool {
        Ok(pool) => pool.scope_fifo(|scope| {
            for (i, item) in items.iter().enumerate() {
                let tx = tx.clone();
                let task = &task;
                scope.spawn_fifo(move |_| {
                    let _ = tx.send((i, task(item)));
                });
            }
        }),
        Err(e) => {
            tracing::warn!("failed to create worker pool ({e}), running sequentially");
            for (i, item) in items.iter().enumerate() {
                let _ = tx.send((i, task(item)));
            }
        }
    }
    drop(tx);

    let mut results: Vec<(usize, R)> = rx.into_iter().collect();
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

pub struct Orchestrator<'a> {
    ctx: BuildContext<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: BuildContext<'a>) -> Self {
        Self { ctx }
    }

    /// Run both phases. `Err` only for configuration problems found before
    /// any subprocess starts; build failures are in the report.
    pub fn run(&self, plan: &BuildPlan) -> Result<RunReport> {
        let started = Instant::now();
        let ctx = &self.ctx;

        for target in &plan.targets {
            check_units(&plan.units_for(target))?;
        }

        if ctx.options.clean_cache {
            for target in &plan.targets {
                ctx.cache.clear(&target.name, None)?;
            }
            ctx.reporter.success("Cleared build cache");
        }

        if let Some(failure) = self.init_phase(&plan.targets) {
            ctx.reporter.error(format!(
                "Initialization failed for {}: {}",
                failure.target, failure.message
            ));
            return Ok(RunReport {
                init_failure: Some(failure),
                elapsed: started.elapsed(),
                ..RunReport::default()
            });
        }

        let workers = build_workers(ctx.options.worker_bound, plan.targets.len());
        tracing::debug!(
            "build phase: {} boards on {} workers",
            plan.targets.len(),
            workers
        );
        let state = RunState::new(ctx.options.first_build_gate);

        let targets = run_pool(workers, &plan.targets, |target| {
            if state.has_failed() {
                tracing::debug!("skipping {}: an earlier board failed", target.name);
                return TargetReport::cancelled(target);
            }
            let began = Instant::now();
            ctx.reporter.set_message(format!("Building {}", target.name));
            let summary = build_target(ctx, &state, target, &plan.units_for(target));
            let outcome = if summary.failed() {
                TargetOutcome::Failed
            } else if summary.count(UnitStatus::Skipped(SkipReason::Cancelled)) > 0 {
                TargetOutcome::Cancelled
            } else {
                TargetOutcome::Succeeded
            };
            ctx.reporter.inc();
            TargetReport {
                target: target.name.clone(),
                outcome,
                summary,
                elapsed: began.elapsed(),
            }
        });

        Ok(RunReport {
            init_failure: None,
            targets,
            diagnostic: state.diagnostic(),
            workers,
            elapsed: started.elapsed(),
        })
    }

    fn init_phase(&self, targets: &[Target]) -> Option<InitFailure> {
        let ctx = &self.ctx;
        let aborted = AtomicBool::new(false);
        let workers = init_workers(ctx.options.parallel_init, targets.len());

        let results = run_pool(workers, targets, |target| {
            if aborted.load(Ordering::SeqCst) {
                tracing::debug!("init of {} cancelled", target.name);
                return Ok(());
            }
            let result = init_target(ctx, target);
            if result.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        });

        results.into_iter().find_map(std::result::Result::err)
    }
}
