//! Prism: a conformance-test harness for GPU device APIs
//!
//! Prism expresses large families of structurally similar device tests as
//! declarative parameter specifications instead of hand-written duplicated
//! test functions. A spec enumerates lazily into concrete cases; each case
//! runs against a device inside a fixture with scoped resources, computes
//! its expected result through a pure reference oracle, and verifies the
//! device's observable output with exact or tolerance-based comparison.
//!
//! # Quick Start
//!
//! ```
//! use prism::device::GpuDevice;
//! use prism::group::TestGroup;
//! use prism::params::params;
//! use prism::runner::Runner;
//!
//! fn main() -> prism::Result<()> {
//!     let mut g = TestGroup::new("demo");
//!     g.test("flags")
//!         .desc("Nothing device-backed yet.")
//!         .cases(params().toggle("indirect"))
//!         .run(|t| {
//!             let _ = t.params().bool("indirect")?;
//!             Ok(())
//!         });
//!
//!     let mut runner = Runner::new(GpuDevice::shared("sim"));
//!     let report = runner.run_group(&g)?;
//!     assert_eq!(report.passed, 2);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! Case generation flows: [`params`] → [`group`] → [`runner`] → per-case
//! [`fixture`] → [`device`], with ground truth from [`oracle`].
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`params`], [`group`], [`fixture`], [`runner`], [`error`](Error) |
//! | **Collaborators** | [`device`] (CPU-simulated), [`oracle`] |
//! | **Suites** | [`suites`] |

pub mod device;
pub mod fixture;
pub mod group;
pub mod oracle;
pub mod params;
pub mod runner;
pub mod suites;

mod error;

pub use error::{Error, Result};

/// Prism version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
