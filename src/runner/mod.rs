//! Sequential case execution and result reporting.
//!
//! The runner walks a group's registered tests, enumerates each test's
//! surviving cases, executes them strictly one at a time against the
//! shared device, and produces a stream of [`CaseReport`]s plus an
//! aggregate [`RunReport`]. Rendering (summary table, verbose listing,
//! JSON, TAP) lives here too; what to do with the rendered text is the
//! caller's concern.

use crate::device::DeviceHandle;
use crate::fixture::{CaseOutcome, Fixture};
use crate::group::{RunFn, TestGroup};
use crate::params::CaseParams;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Output format for run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Summary only (per-test counts).
    Summary,
    /// Verbose (every case result).
    Verbose,
    /// JSON output for CI.
    Json,
    /// TAP format.
    Tap,
}

/// Configuration for the runner.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Only run cases whose full path (`group:test:case`) matches.
    pub filter: Option<Regex>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of a single executed (or skipped) case.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub group: String,
    pub test: String,
    /// Case identity string; empty for test-level skips.
    pub case_id: String,
    pub outcome: CaseOutcome,
    /// Diagnostics of failed expectations, in record order.
    pub diagnostics: Vec<String>,
    pub duration: Duration,
}

impl CaseReport {
    pub fn full_path(&self) -> String {
        if self.case_id.is_empty() {
            format!("{}:{}", self.group, self.test)
        } else {
            format!("{}:{}:{}", self.group, self.test, self.case_id)
        }
    }
}

/// Aggregated results for one registered test inside a report.
#[derive(Debug, Clone, Default)]
pub struct TestTotals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TestTotals {
    pub fn pass_rate(&self) -> f64 {
        let runnable = self.total - self.skipped;
        if runnable == 0 {
            0.0
        } else {
            self.passed as f64 / runnable as f64 * 100.0
        }
    }
}

/// Summary report for an entire run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub cases: Vec<CaseReport>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_time: Duration,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one case result.
    pub fn add_result(&mut self, report: CaseReport) {
        self.total += 1;
        match report.outcome {
            CaseOutcome::Pass => self.passed += 1,
            CaseOutcome::Fail => self.failed += 1,
            CaseOutcome::Skip => self.skipped += 1,
        }
        self.total_time += report.duration;
        self.cases.push(report);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: RunReport) {
        for case in other.cases {
            self.add_result(case);
        }
    }

    /// Overall pass rate over the runnable (non-skipped) cases.
    pub fn pass_rate(&self) -> f64 {
        let runnable = self.total - self.skipped;
        if runnable == 0 {
            0.0
        } else {
            self.passed as f64 / runnable as f64 * 100.0
        }
    }

    /// Per-test aggregation keyed by `group:test`.
    pub fn per_test(&self) -> BTreeMap<String, TestTotals> {
        let mut out: BTreeMap<String, TestTotals> = BTreeMap::new();
        for case in &self.cases {
            let entry = out
                .entry(format!("{}:{}", case.group, case.test))
                .or_default();
            entry.total += 1;
            match case.outcome {
                CaseOutcome::Pass => entry.passed += 1,
                CaseOutcome::Fail => entry.failed += 1,
                CaseOutcome::Skip => entry.skipped += 1,
            }
        }
        out
    }

    /// Format as a summary string.
    pub fn format_summary(&self) -> String {
        let mut s = String::new();
        s.push_str("\n=== Prism Conformance Report ===\n\n");
        s.push_str(&format!(
            "Total: {} | Pass: {} | Fail: {} | Skip: {}\n",
            self.total, self.passed, self.failed, self.skipped
        ));
        s.push_str(&format!(
            "Pass Rate: {:.1}% ({}/{})\n",
            self.pass_rate(),
            self.passed,
            self.total - self.skipped
        ));
        s.push_str(&format!("Time: {:?}\n\n", self.total_time));

        s.push_str("Per-Test Results:\n");
        s.push_str(&format!(
            "{:<40} {:>6} {:>6} {:>6} {:>7}\n",
            "Test", "Total", "Pass", "Fail", "Rate"
        ));
        s.push_str(&"-".repeat(69));
        s.push('\n');
        for (name, totals) in self.per_test() {
            s.push_str(&format!(
                "{:<40} {:>6} {:>6} {:>6} {:>6.1}%\n",
                name,
                totals.total,
                totals.passed,
                totals.failed,
                totals.pass_rate()
            ));
        }
        s
    }

    /// Format every case result, one line each.
    pub fn format_verbose(&self) -> String {
        let mut s = String::new();
        for case in &self.cases {
            let icon = match case.outcome {
                CaseOutcome::Pass => "✓",
                CaseOutcome::Fail => "✗",
                CaseOutcome::Skip => "○",
            };
            s.push_str(&format!("{} {} ({:?})\n", icon, case.full_path(), case.duration));
            for diagnostic in &case.diagnostics {
                s.push_str(&format!("    {}\n", diagnostic));
            }
        }
        s.push_str(&self.format_summary());
        s
    }

    /// Export as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let failures: Vec<serde_json::Value> = self
            .cases
            .iter()
            .filter(|c| c.outcome == CaseOutcome::Fail)
            .map(|c| {
                serde_json::json!({
                    "group": c.group,
                    "test": c.test,
                    "case": c.case_id,
                    "diagnostics": c.diagnostics,
                })
            })
            .collect();

        serde_json::json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "skipped": self.skipped,
            "pass_rate": self.pass_rate(),
            "total_time_ms": self.total_time.as_millis(),
            "failures": failures,
        })
    }

    /// Export as TAP (Test Anything Protocol) for CI.
    pub fn to_tap(&self) -> String {
        let mut s = format!("TAP version 13\n1..{}\n", self.cases.len());
        for (i, case) in self.cases.iter().enumerate() {
            let n = i + 1;
            match case.outcome {
                CaseOutcome::Pass => {
                    s.push_str(&format!("ok {} - {}\n", n, case.full_path()));
                }
                CaseOutcome::Skip => {
                    s.push_str(&format!("ok {} - {} # SKIP\n", n, case.full_path()));
                }
                CaseOutcome::Fail => {
                    s.push_str(&format!("not ok {} - {}\n", n, case.full_path()));
                    if !case.diagnostics.is_empty() {
                        s.push_str("  ---\n");
                        for diagnostic in &case.diagnostics {
                            s.push_str(&format!("  message: {}\n", diagnostic));
                        }
                        s.push_str("  ---\n");
                    }
                }
            }
        }
        s
    }

    /// Render in the requested format.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Summary => self.format_summary(),
            OutputFormat::Verbose => self.format_verbose(),
            OutputFormat::Json => {
                serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
            }
            OutputFormat::Tap => self.to_tap(),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_summary())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes groups of tests against a shared device, strictly one case at
/// a time.
pub struct Runner {
    device: DeviceHandle,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(device: DeviceHandle, config: RunnerConfig) -> Self {
        Self { device, config }
    }

    fn selected(&self, path: &str) -> bool {
        match &self.config.filter {
            Some(filter) => filter.is_match(path),
            None => true,
        }
    }

    /// Run every registered test of `group`.
    ///
    /// A usage error raised while generating a test's case list aborts the
    /// whole group (the case list itself could not be produced); failures
    /// inside a case never affect its siblings.
    pub fn run_group(&mut self, group: &TestGroup) -> crate::Result<RunReport> {
        group.validate()?;
        tracing::info!(group = group.name(), tests = group.tests().len(), "running group");

        let mut report = RunReport::new();
        for test in group.tests() {
            if test.is_unimplemented() {
                let path = format!("{}:{}", group.name(), test.name());
                if self.selected(&path) {
                    tracing::debug!(%path, "skipping unimplemented test");
                    report.add_result(CaseReport {
                        group: group.name().to_string(),
                        test: test.name().to_string(),
                        case_id: String::new(),
                        outcome: CaseOutcome::Skip,
                        diagnostics: Vec::new(),
                        duration: Duration::ZERO,
                    });
                }
                continue;
            }

            let run = test
                .run_fn()
                .ok_or_else(|| crate::Error::Internal("runnable test without run fn".into()))?;
            for params in test.cases() {
                let params = params?;
                let path = format!("{}:{}:{}", group.name(), test.name(), params.id_string());
                if !self.selected(&path) {
                    continue;
                }
                report.add_result(self.run_case(group.name(), test.name(), &run, params));
            }
        }
        tracing::info!(
            group = group.name(),
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            "group finished"
        );
        Ok(report)
    }

    /// Run several groups, merging their reports.
    pub fn run_groups(&mut self, groups: &[TestGroup]) -> crate::Result<RunReport> {
        let mut report = RunReport::new();
        for group in groups {
            report.merge(self.run_group(group)?);
        }
        Ok(report)
    }

    fn run_case(
        &mut self,
        group: &str,
        test: &str,
        run: &RunFn,
        params: CaseParams,
    ) -> CaseReport {
        let case_id = params.id_string();
        tracing::debug!(%group, %test, case = %case_id, "running case");
        let start = Instant::now();

        let mut fixture = Fixture::new(self.device.clone(), params);
        if let Err(e) = run(&mut fixture) {
            // Fatal to this case only; the verdict is a recorded failure.
            fixture.recorder_mut().fail(format!("fatal: {}", e));
        }
        let outcome = fixture.recorder().verdict();
        let diagnostics = fixture.recorder().failures();
        fixture.finalize();

        CaseReport {
            group: group.to_string(),
            test: test.to_string(),
            case_id,
            outcome,
            diagnostics,
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GpuDevice;
    use crate::group::TestGroup;
    use crate::params::params;

    fn demo_group() -> TestGroup {
        let mut g = TestGroup::new("demo");
        g.test("passes")
            .cases(params().toggle("flag"))
            .run(|_| Ok(()));
        g.test("fails")
            .cases(params())
            .run(|t| {
                t.fail("always wrong");
                Ok(())
            });
        g.test("placeholder").desc("Later.").unimplemented();
        g
    }

    #[test]
    fn test_run_group_report_stream() {
        let mut runner = Runner::new(GpuDevice::shared("Test GPU"));
        let report = runner.run_group(&demo_group()).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);

        let failing: Vec<_> = report
            .cases
            .iter()
            .filter(|c| c.outcome == CaseOutcome::Fail)
            .collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].test, "fails");
        assert_eq!(failing[0].diagnostics, vec!["always wrong".to_string()]);
    }

    #[test]
    fn test_case_failure_is_isolated() {
        let mut g = TestGroup::new("demo");
        g.test("mixed")
            .cases(params().combine("n", [1, 2, 3]))
            .run(|t| {
                if t.params().int("n")? == 2 {
                    t.fail("bad case");
                }
                Ok(())
            });
        let mut runner = Runner::new(GpuDevice::shared("Test GPU"));
        let report = runner.run_group(&g).unwrap();
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_fatal_error_recorded_as_failure() {
        let mut g = TestGroup::new("demo");
        g.test("fatal")
            .cases(params())
            .run(|t| t.params().bool("unbound").map(|_| ()));
        let mut runner = Runner::new(GpuDevice::shared("Test GPU"));
        let report = runner.run_group(&g).unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.cases[0].diagnostics[0].starts_with("fatal: UsageError"));
    }

    #[test]
    fn test_generation_error_aborts_group() {
        let mut g = TestGroup::new("demo");
        g.test("broken")
            .cases(params().unless(|p| Ok(p.bool("unbound")?)))
            .run(|_| Ok(()));
        let mut runner = Runner::new(GpuDevice::shared("Test GPU"));
        assert!(runner.run_group(&g).unwrap_err().is_usage());
    }

    #[test]
    fn test_filter_selects_cases() {
        let config = RunnerConfig {
            filter: Some(Regex::new("flag=true").unwrap()),
        };
        let mut runner = Runner::with_config(GpuDevice::shared("Test GPU"), config);
        let report = runner.run_group(&demo_group()).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.cases[0].case_id, "flag=true");
    }

    #[test]
    fn test_render_formats() {
        let mut runner = Runner::new(GpuDevice::shared("Test GPU"));
        let report = runner.run_group(&demo_group()).unwrap();

        let summary = report.render(OutputFormat::Summary);
        assert!(summary.contains("Pass: 2"));
        assert!(summary.contains("demo:passes"));

        let tap = report.render(OutputFormat::Tap);
        assert!(tap.starts_with("TAP version 13\n1..4\n"));
        assert!(tap.contains("not ok"));
        assert!(tap.contains("# SKIP"));

        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json)).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["failures"][0]["test"], "fails");
    }
}
