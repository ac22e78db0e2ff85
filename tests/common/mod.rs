//! Shared test helpers for integration tests

use prism::device::{DeviceHandle, GpuDevice};
use prism::group::TestGroup;
use prism::runner::{RunReport, Runner};

/// A fresh simulated device.
#[allow(dead_code)]
pub fn shared_device() -> DeviceHandle {
    GpuDevice::shared("Integration GPU")
}

/// Run one group against a fresh device.
#[allow(dead_code)]
pub fn run_group(group: &TestGroup) -> prism::Result<RunReport> {
    let mut runner = Runner::new(shared_device());
    runner.run_group(group)
}

/// Collect the case identity strings of a group, in order.
#[allow(dead_code)]
pub fn case_ids(group: &TestGroup) -> prism::Result<Vec<String>> {
    Ok(group.enumerate()?.into_iter().map(|c| c.id).collect())
}
