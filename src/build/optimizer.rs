//! Two-stage build sequencing for one board.
//!
//! The first example that actually needs compiling is the *seed*: it is built
//! with auto-clean disabled so the library objects it produces stay around.
//! Every later example is a *batch* build that reuses those objects.
//!
//! ```text
//! Seeding ──seed ok──▶ Batching ──last unit──▶ Done
//!    │                                          ▲
//!    └──────────────seed failed─────────────────┘  (remaining units skipped)
//! ```
//!
//! Up-to-date examples pass straight through without consuming the seed slot.
//! Batch failures are independent; the sequence keeps going.

use crate::toolchain::Stage;
use crate::unit::BuildUnit;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    Seeding,
    Batching,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The board's seed build failed, so there was nothing to batch against.
    SeedFailed,
    /// An earlier example failed in standalone mode.
    EarlierFailure,
    /// Another board failed and the run is winding down.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Built,
    UpToDate,
    Failed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: String,
    pub status: UnitStatus,
    pub stage: Option<Stage>,
    pub elapsed: Duration,
    /// Captured toolchain output, empty when nothing ran.
    pub log: String,
    /// Output of the verbose re-run, for the one failure that got it.
    pub diagnostic: Option<String>,
    pub hint: Option<String>,
    pub message: Option<String>,
}

impl UnitReport {
    fn new(unit: &str, status: UnitStatus) -> Self {
        Self {
            unit: unit.to_string(),
            status,
            stage: None,
            elapsed: Duration::ZERO,
            log: String::new(),
            diagnostic: None,
            hint: None,
            message: None,
        }
    }

    pub fn up_to_date(unit: &str) -> Self {
        Self::new(unit, UnitStatus::UpToDate)
    }

    pub fn built(unit: &str, elapsed: Duration, log: String) -> Self {
        Self {
            elapsed,
            log,
            ..Self::new(unit, UnitStatus::Built)
        }
    }

    pub fn failed(unit: &str, elapsed: Duration, log: String, message: impl Into<String>) -> Self {
        Self {
            elapsed,
            log,
            message: Some(message.into()),
            ..Self::new(unit, UnitStatus::Failed)
        }
    }

    pub fn skipped(unit: &str, reason: SkipReason) -> Self {
        Self::new(unit, UnitStatus::Skipped(reason))
    }

    pub fn is_failure(&self) -> bool {
        self.status == UnitStatus::Failed
    }

    pub fn ran_toolchain(&self) -> bool {
        matches!(self.status, UnitStatus::Built | UnitStatus::Failed)
    }
}

/// Per-board outcome of a full sequence.
#[derive(Debug, Clone, Default)]
pub struct SequenceSummary {
    pub seed_unit: Option<String>,
    pub seed_elapsed: Duration,
    pub batch_elapsed: Duration,
    pub units: Vec<UnitReport>,
}

impl SequenceSummary {
    pub fn failed(&self) -> bool {
        self.units.iter().any(UnitReport::is_failure)
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    pub fn built(&self) -> usize {
        self.count(UnitStatus::Built)
    }

    pub fn total_elapsed(&self) -> Duration {
        self.seed_elapsed + self.batch_elapsed
    }
}

pub struct TwoStageOptimizer {
    state: OptimizerState,
    two_stage: bool,
}

impl TwoStageOptimizer {
    pub fn new(two_stage: bool) -> Self {
        Self {
            state: OptimizerState::Seeding,
            two_stage,
        }
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Stage the next example would be compiled with.
    pub fn next_stage(&self) -> Stage {
        match (self.two_stage, self.state) {
            (false, _) => Stage::Standalone,
            (true, OptimizerState::Seeding) => Stage::Seed,
            (true, _) => Stage::Batch,
        }
    }

    /// Run `build` for each unit in order.
    ///
    /// `build` receives the stage to compile with and returns the unit's report;
    /// an `UpToDate` report leaves the state machine where it was. `cancelled`
    /// is polled before each unit and never interrupts one in progress.
    pub fn run<F, C>(&mut self, units: &[BuildUnit], mut build: F, cancelled: C) -> SequenceSummary
    where
        F: FnMut(&BuildUnit, Stage) -> UnitReport,
        C: Fn() -> bool,
    {
        let mut summary = SequenceSummary::default();
        let mut halted: Option<SkipReason> = None;

        for unit in units {
            if halted.is_none() && cancelled() {
                tracing::debug!("cancellation observed before {}", unit.name);
                halted = Some(SkipReason::Cancelled);
            }
            if let Some(reason) = halted {
                summary.units.push(UnitReport::skipped(&unit.name, reason));
                continue;
            }

            let stage = self.next_stage();
            let started = Instant::now();
            let mut report = build(unit, stage);
            let spent = started.elapsed();

            if report.ran_toolchain() {
                report.stage = Some(stage);
                match stage {
                    Stage::Seed => {
                        summary.seed_unit = Some(unit.name.clone());
                        summary.seed_elapsed += spent;
                    }
                    Stage::Batch | Stage::Standalone => summary.batch_elapsed += spent,
                }
            }

            match (stage, report.status) {
                (Stage::Seed, UnitStatus::Built) => self.state = OptimizerState::Batching,
                (Stage::Seed, UnitStatus::Failed) => {
                    tracing::debug!("seed build {} failed, skipping the rest", unit.name);
                    halted = Some(SkipReason::SeedFailed);
                }
                (Stage::Standalone, UnitStatus::Failed) => {
                    halted = Some(SkipReason::EarlierFailure);
                }
                _ => {}
            }
            summary.units.push(report);
        }

        self.state = OptimizerState::Done;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    fn units(names: &[&str]) -> Vec<BuildUnit> {
        names
            .iter()
            .map(|n| BuildUnit {
                name: n.to_string(),
                dir: PathBuf::from(n),
                entry: format!("{n}.ino"),
                extra_libs: vec![],
            })
            .collect()
    }

    fn statuses(summary: &SequenceSummary) -> Vec<UnitStatus> {
        summary.units.iter().map(|u| u.status).collect()
    }

    #[test]
    fn test_seed_then_batch() {
        let seen = RefCell::new(Vec::new());
        let mut opt = TwoStageOptimizer::new(true);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, stage| {
                seen.borrow_mut().push((u.name.clone(), stage));
                UnitReport::built(&u.name, Duration::ZERO, String::new())
            },
            || false,
        );
        assert_eq!(
            seen.into_inner(),
            vec![
                ("A".to_string(), Stage::Seed),
                ("B".to_string(), Stage::Batch),
                ("C".to_string(), Stage::Batch)
            ]
        );
        assert_eq!(summary.seed_unit.as_deref(), Some("A"));
        assert_eq!(opt.state(), OptimizerState::Done);
        assert!(!summary.failed());
    }

    #[test]
    fn test_up_to_date_does_not_consume_seed() {
        let mut opt = TwoStageOptimizer::new(true);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, stage| match u.name.as_str() {
                "A" => UnitReport::up_to_date("A"),
                _ => {
                    if u.name == "B" {
                        assert_eq!(stage, Stage::Seed);
                    } else {
                        assert_eq!(stage, Stage::Batch);
                    }
                    UnitReport::built(&u.name, Duration::ZERO, String::new())
                }
            },
            || false,
        );
        assert_eq!(summary.seed_unit.as_deref(), Some("B"));
        assert_eq!(summary.units[0].stage, None);
    }

    #[test]
    fn test_seed_failure_aborts_target() {
        let calls = RefCell::new(0);
        let mut opt = TwoStageOptimizer::new(true);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, _| {
                *calls.borrow_mut() += 1;
                UnitReport::failed(&u.name, Duration::ZERO, String::new(), "exit 1")
            },
            || false,
        );
        assert_eq!(calls.into_inner(), 1);
        assert_eq!(
            statuses(&summary),
            vec![
                UnitStatus::Failed,
                UnitStatus::Skipped(SkipReason::SeedFailed),
                UnitStatus::Skipped(SkipReason::SeedFailed)
            ]
        );
    }

    #[test]
    fn test_batch_failures_are_independent() {
        let mut opt = TwoStageOptimizer::new(true);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, _| {
                if u.name == "B" {
                    UnitReport::failed("B", Duration::ZERO, String::new(), "exit 1")
                } else {
                    UnitReport::built(&u.name, Duration::ZERO, String::new())
                }
            },
            || false,
        );
        assert_eq!(
            statuses(&summary),
            vec![UnitStatus::Built, UnitStatus::Failed, UnitStatus::Built]
        );
        assert!(summary.failed());
    }

    #[test]
    fn test_standalone_failure_stops_sequence() {
        let mut opt = TwoStageOptimizer::new(false);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, stage| {
                assert_eq!(stage, Stage::Standalone);
                if u.name == "B" {
                    UnitReport::failed("B", Duration::ZERO, String::new(), "exit 2")
                } else {
                    UnitReport::built(&u.name, Duration::ZERO, String::new())
                }
            },
            || false,
        );
        assert_eq!(
            statuses(&summary),
            vec![
                UnitStatus::Built,
                UnitStatus::Failed,
                UnitStatus::Skipped(SkipReason::EarlierFailure)
            ]
        );
        assert!(summary.seed_unit.is_none());
    }

    #[test]
    fn test_cancellation_is_polled_between_units() {
        let built = RefCell::new(0);
        let mut opt = TwoStageOptimizer::new(true);
        let summary = opt.run(
            &units(&["A", "B", "C"]),
            |u, _| {
                *built.borrow_mut() += 1;
                UnitReport::built(&u.name, Duration::ZERO, String::new())
            },
            || *built.borrow() >= 1,
        );
        assert_eq!(summary.built(), 1);
        assert_eq!(summary.count(UnitStatus::Skipped(SkipReason::Cancelled)), 2);
    }
}
