//! Integration tests for fixtures, verification, and the runner

mod common;

use common::{run_group, shared_device};
use prism::device::BufferUsage;
use prism::fixture::{CaseOutcome, Fixture};
use prism::group::TestGroup;
use prism::params::{params, CaseParams};
use prism::runner::Runner;
use prism::Error;

#[test]
fn byte_mismatch_reports_index_and_values() {
    let mut g = TestGroup::new("bytes");
    g.test("contents")
        .cases(params())
        .run(|t| {
            let src = t.create_buffer_with_data(&[0, 255, 0, 254], BufferUsage::COPY_SRC)?;
            t.expect_buffer_contents(src, &[0, 255, 0, 255])
        });

    let report = run_group(&g).unwrap();
    assert_eq!(report.failed, 1);
    let case = &report.cases[0];
    assert_eq!(case.outcome, CaseOutcome::Fail);
    assert_eq!(case.diagnostics, vec!["at [3], expected 255, got 254".to_string()]);
}

#[test]
fn tolerance_bounds_are_inclusive() {
    let device = shared_device();
    let mut t = Fixture::new(device, CaseParams::new());
    t.expect_in_range("observed", &[0.5001], &[0.49], &[0.51]);
    assert_eq!(t.recorder().verdict(), CaseOutcome::Pass);
    t.expect_in_range("observed", &[0.52], &[0.49], &[0.51]);
    assert_eq!(t.recorder().verdict(), CaseOutcome::Fail);
}

#[test]
fn resources_released_exactly_once_after_usage_error() {
    let device = shared_device();
    let mut g = TestGroup::new("leaks");
    g.test("failing_case")
        .cases(params())
        .run(|t| {
            t.create_buffer(64, BufferUsage::COPY_DST)?;
            t.create_buffer(64, BufferUsage::COPY_DST)?;
            // The case dies on an unbound dimension before finishing.
            let _ = t.params().bool("never-bound")?;
            Ok(())
        });

    let mut runner = Runner::new(device.clone());
    let report = runner.run_group(&g).unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.cases[0].diagnostics[0].starts_with("fatal: UsageError"));

    let dev = device.borrow();
    assert_eq!(dev.buffer_count(), 0, "no resource leaked past the case");
    assert_eq!(dev.stats.buffers_created, dev.stats.buffers_destroyed);
}

#[test]
fn sibling_cases_unaffected_by_failures() {
    let device = shared_device();
    let mut g = TestGroup::new("isolation");
    g.test("mixed")
        .cases(params().combine("n", [1, 2, 3, 4]))
        .run(|t| {
            let n = t.params().int("n")?;
            let src = t.create_buffer_with_data(&[n as u8], BufferUsage::COPY_SRC)?;
            t.expect_buffer_contents(src, &[2])
        });

    let mut runner = Runner::new(device);
    let report = runner.run_group(&g).unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 3);
}

#[test]
fn report_stream_carries_group_case_outcome_diagnostics() {
    let mut g = TestGroup::new("stream");
    g.test("ok").cases(params().toggle("x")).run(|_| Ok(()));
    g.test("todo").desc("Later.").unimplemented();

    let report = run_group(&g).unwrap();
    let tuples: Vec<(String, String, CaseOutcome)> = report
        .cases
        .iter()
        .map(|c| (c.group.clone(), c.full_path(), c.outcome))
        .collect();
    assert_eq!(
        tuples,
        vec![
            ("stream".into(), "stream:ok:x=false".into(), CaseOutcome::Pass),
            ("stream".into(), "stream:ok:x=true".into(), CaseOutcome::Pass),
            ("stream".into(), "stream:todo".into(), CaseOutcome::Skip),
        ]
    );
}

#[test]
fn device_failure_is_fatal_to_the_case_but_still_releases() {
    let device = shared_device();
    let mut g = TestGroup::new("device_errors");
    g.test("oversized")
        .cases(params())
        .run(|t| {
            t.create_buffer(16, BufferUsage::COPY_DST)?;
            // Second creation exceeds the device limit.
            t.create_buffer(1 << 40, BufferUsage::COPY_DST)?;
            Ok(())
        });

    let mut runner = Runner::new(device.clone());
    let report = runner.run_group(&g).unwrap();
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.cases[0].diagnostics[0].as_str(),
        s if s.starts_with("fatal: DeviceError")
    ));
    assert_eq!(device.borrow().buffer_count(), 0);
}

#[test]
fn generation_usage_error_aborts_the_whole_group() {
    let mut g = TestGroup::new("aborted");
    g.test("fine").cases(params()).run(|_| Ok(()));
    g.test("broken")
        .cases(params().unless(|p| Ok(p.bool("missing")?)))
        .run(|_| Ok(()));

    let err = run_group(&g).unwrap_err();
    assert!(matches!(err, Error::Usage { .. }));
}
