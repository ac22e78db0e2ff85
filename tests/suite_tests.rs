//! End-to-end runs of the shipped suites against the simulated device

mod common;

use common::run_group;
use prism::fixture::CaseOutcome;
use prism::runner::{Runner, RunnerConfig};
use prism::suites;
use regex::Regex;

#[test]
fn blending_suite_passes_end_to_end() {
    let g = suites::blending::test_group();
    let report = run_group(&g).unwrap();

    // 2 components x 13 x 13 factors x 5 operations x 2 dst colors, plus
    // the three unimplemented placeholders.
    assert_eq!(report.total, 3380 + 3);
    assert_eq!(report.skipped, 3);
    let failures: Vec<_> = report
        .cases
        .iter()
        .filter(|c| c.outcome == CaseOutcome::Fail)
        .map(|c| (c.full_path(), c.diagnostics.clone()))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
}

#[test]
fn topology_suite_passes_end_to_end() {
    let g = suites::topology::test_group();
    let report = run_group(&g).unwrap();

    // basic: 5*2*2 minus restart on non-strips; unaligned: 2 + 4.
    assert_eq!(report.total, 14 + 6);
    assert_eq!(report.skipped, 0);
    let failures: Vec<_> = report
        .cases
        .iter()
        .filter(|c| c.outcome == CaseOutcome::Fail)
        .map(|c| (c.full_path(), c.diagnostics.clone()))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
}

#[test]
fn filtered_run_selects_by_identity() {
    let g = suites::topology::test_group();
    let config = RunnerConfig {
        filter: Some(Regex::new("topology=line-strip.*primitiveRestart=true").unwrap()),
    };
    let mut runner = Runner::with_config(common::shared_device(), config);
    let report = runner.run_group(&g).unwrap();
    assert_eq!(report.total, 2); // indirect false/true
    assert_eq!(report.failed, 0);
}

#[test]
fn listing_is_stable_across_enumerations() {
    for g in suites::all() {
        let first: Vec<String> = g.enumerate().unwrap().into_iter().map(|c| c.id).collect();
        let second: Vec<String> = g.enumerate().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(first, second, "suite '{}' must regenerate identically", g.name());
    }
}

#[test]
fn no_cross_case_resource_leakage() {
    let device = common::shared_device();
    let mut runner = Runner::new(device.clone());
    let g = suites::topology::test_group();
    runner.run_group(&g).unwrap();

    let dev = device.borrow();
    assert_eq!(dev.buffer_count(), 0);
    assert_eq!(dev.texture_count(), 0);
    assert_eq!(dev.pipeline_count(), 0);
}
