//! Cancellation, diagnostics and init-failure semantics of the orchestrator.

mod common;

use boardsweep::build::{SkipReason, TargetOutcome, UnitStatus};
use common::{FakeToolchain, Project, options};
use std::time::Duration;

#[test]
fn test_failure_cancels_boards_not_yet_started() {
    let project = Project::new(&["U1", "U2"]);
    let plan = project.plan(&["B", "A", "C"], &["U1", "U2"]);
    let toolchain = FakeToolchain::failing(&[("A", "U1")]);

    let report = project.run(&toolchain, &plan, &options(1)).unwrap();
    assert!(!report.success());

    let outcomes: Vec<(&str, TargetOutcome)> = report
        .targets
        .iter()
        .map(|t| (t.target.as_str(), t.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("B", TargetOutcome::Succeeded),
            ("A", TargetOutcome::Failed),
            ("C", TargetOutcome::Cancelled),
        ]
    );
    assert!(toolchain.compiled().iter().all(|c| c.target != "C"));

    // A's seed failed, so its second example never ran.
    let a = &report.targets[1];
    assert_eq!(a.summary.units[1].status, UnitStatus::Skipped(SkipReason::SeedFailed));
    assert_eq!(report.failed_targets().len(), 1);
}

#[test]
fn test_failure_stops_concurrent_board_mid_sequence() {
    let examples = ["U1", "U2", "U3", "U4", "U5", "U6"];
    let project = Project::new(&examples);
    let plan = project.plan(&["A", "B"], &examples);
    let toolchain = FakeToolchain::failing(&[("A", "U2")]).slow(Duration::from_millis(200));

    let report = project.run(&toolchain, &plan, &options(2)).unwrap();
    assert!(!report.success());

    // The failing board keeps batching against its seed.
    let a = &report.targets[0];
    assert_eq!(a.outcome, TargetOutcome::Failed);
    assert_eq!(a.summary.built(), 5);

    // The other board only finishes what was already in flight.
    let b = &report.targets[1];
    assert_eq!(b.outcome, TargetOutcome::Cancelled);
    let b_compiles = toolchain
        .compiled()
        .iter()
        .filter(|c| c.target == "B")
        .count();
    assert!(b_compiles <= 2, "B kept compiling after A failed: {b_compiles}");
    let cancelled = b.summary.count(UnitStatus::Skipped(SkipReason::Cancelled));
    assert!(cancelled >= 4, "only {cancelled} of B's examples were cancelled");
    assert_eq!(b.summary.units.len(), examples.len());
}

#[test]
fn test_verbose_rerun_happens_once() {
    let project = Project::new(&["U1", "U2", "U3"]);
    let plan = project.plan(&["A"], &["U1", "U2", "U3"]);
    let toolchain = FakeToolchain::failing(&[("A", "U2"), ("A", "U3")]);
    let mut opts = options(1);
    opts.verbose_on_failure = true;

    let report = project.run(&toolchain, &plan, &opts).unwrap();

    // Batch failures are independent: both U2 and U3 were attempted.
    let statuses: Vec<UnitStatus> = report.targets[0]
        .summary
        .units
        .iter()
        .map(|u| u.status)
        .collect();
    assert_eq!(
        statuses,
        vec![UnitStatus::Built, UnitStatus::Failed, UnitStatus::Failed]
    );

    let verbose: Vec<_> = toolchain
        .compiled()
        .into_iter()
        .filter(|c| c.verbose)
        .collect();
    assert_eq!(verbose.len(), 1);
    assert_eq!(verbose[0].unit, "U2");

    let diagnostic = report.diagnostic.expect("first failure is diagnosed");
    assert_eq!((diagnostic.target.as_str(), diagnostic.unit.as_str()), ("A", "U2"));
    assert!(diagnostic.log.contains("second attempt with verbose output"));
    assert!(report.targets[0].summary.units[1].hint.is_none());
}

#[test]
fn test_init_failure_blocks_build_phase() {
    let project = Project::new(&["U1"]);
    let plan = project.plan(&["A", "B"], &["U1"]);
    let mut toolchain = FakeToolchain::default();
    toolchain.failing_init.insert("B".to_string());

    let report = project.run(&toolchain, &plan, &options(2)).unwrap();
    assert!(!report.success());
    let failure = report.init_failure.expect("init failure reported");
    assert_eq!(failure.target, "B");
    assert!(failure.log.contains("Unknown board ID"));
    assert!(report.targets.is_empty());
    assert!(toolchain.compiled().is_empty());
}

#[test]
fn test_init_failure_skips_inits_not_yet_started() {
    let project = Project::new(&["U1"]);
    let plan = project.plan(&["A", "B", "C"], &["U1"]);
    let mut toolchain = FakeToolchain::default();
    toolchain.failing_init.insert("A".to_string());

    let report = project.run(&toolchain, &plan, &options(3)).unwrap();
    assert_eq!(report.init_failure.map(|f| f.target).as_deref(), Some("A"));
    assert_eq!(*toolchain.inits.lock().unwrap(), vec!["A".to_string()]);
    assert!(toolchain.compiled().is_empty());
}

#[test]
fn test_missing_example_aborts_before_any_subprocess() {
    let project = Project::new(&["U1"]);
    let plan = project.plan(&["A"], &["U1"]);
    std::fs::remove_file(project.examples_dir().join("U1").join("U1.ino")).unwrap();
    let toolchain = FakeToolchain::default();

    let err = project.run(&toolchain, &plan, &options(1)).unwrap_err();
    assert!(err.is_configuration());
    assert!(toolchain.inits.lock().unwrap().is_empty());
}

#[test]
fn test_standalone_mode_stops_board_on_first_failure() {
    let project = Project::new(&["U1", "U2", "U3"]);
    let plan = project.plan(&["A"], &["U1", "U2", "U3"]);
    let toolchain = FakeToolchain::failing(&[("A", "U2")]);
    let mut opts = options(1);
    opts.two_stage = false;

    let report = project.run(&toolchain, &plan, &opts).unwrap();
    let units = &report.targets[0].summary.units;
    assert_eq!(units[2].status, UnitStatus::Skipped(SkipReason::EarlierFailure));
    assert_eq!(toolchain.compiled_pairs().len(), 2);
}

#[test]
fn test_seed_gate_does_not_change_results() {
    let project = Project::new(&["U1", "U2"]);
    let plan = project.plan(&["A", "B", "C"], &["U1", "U2"]);
    let toolchain = FakeToolchain::default();
    let mut opts = options(3);
    opts.first_build_gate = true;
    opts.parallel_init = true;

    let report = project.run(&toolchain, &plan, &opts).unwrap();
    assert!(report.success());
    assert_eq!(toolchain.compiled_pairs().len(), 6);
    assert_eq!(toolchain.inits.lock().unwrap().len(), 3);
}

#[test]
fn test_seed_gate_serializes_seed_builds() {
    let run = |gate: bool| {
        let project = Project::new(&["U1", "U2"]);
        let plan = project.plan(&["A", "B", "C"], &["U1", "U2"]);
        let toolchain = FakeToolchain::default().slow(Duration::from_millis(200));
        let mut opts = options(3);
        opts.first_build_gate = gate;

        let report = project.run(&toolchain, &plan, &opts).unwrap();
        assert!(report.success());
        toolchain.peak_concurrent_seeds()
    };

    assert_eq!(run(true), 1);
    assert!(run(false) > 1);
}
