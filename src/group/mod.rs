//! Case registry: named tests grouped with descriptions, case specs, and
//! run functions.
//!
//! A [`TestGroup`] collects registrations made through a small builder
//! chain:
//!
//! ```
//! use prism::group::TestGroup;
//! use prism::params::params;
//!
//! let mut g = TestGroup::new("example");
//! g.test("basic")
//!     .desc("Exercise the basic path.")
//!     .cases(params().toggle("indirect"))
//!     .run(|t| {
//!         let _ = t.params().bool("indirect")?;
//!         Ok(())
//!     });
//! g.test("formats").desc("Not yet implemented.").unimplemented();
//! assert_eq!(g.tests().len(), 2);
//! ```
//!
//! Each registered test moves through `registered -> running -> verdict`
//! per case, with no backward transitions; execution and aggregation are
//! the runner's concern.

use crate::error::{Error, Result};
use crate::fixture::Fixture;
use crate::params::{CaseParams, ParamSpec};
use std::fmt;
use std::rc::Rc;

/// A case's run function. Failures are recorded through the fixture's
/// recorder; an `Err` return is fatal to the case only.
pub type RunFn = Rc<dyn Fn(&mut Fixture) -> Result<()>>;

/// Per-case selection predicate: cases for which it returns `false` are
/// dropped before execution.
pub type CaseFilter = Rc<dyn Fn(&CaseParams) -> Result<bool>>;

// ---------------------------------------------------------------------------
// TestCase
// ---------------------------------------------------------------------------

/// One concrete case of a registered test.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub group: String,
    pub test: String,
    /// Deterministic serialization of the case parameters.
    pub id: String,
    pub params: CaseParams,
}

impl TestCase {
    /// Full selection path, e.g. `blending:blend_component:operation=add;...`.
    pub fn full_path(&self) -> String {
        format!("{}:{}:{}", self.group, self.test, self.id)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

// ---------------------------------------------------------------------------
// Test
// ---------------------------------------------------------------------------

enum TestKind {
    Runnable { spec: ParamSpec, run: RunFn },
    Unimplemented,
}

/// A registered test: description, case spec, optional filter, run fn.
pub struct Test {
    name: String,
    description: String,
    filter: Option<CaseFilter>,
    kind: TestKind,
}

impl Test {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// True for a placeholder registration that always skips.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self.kind, TestKind::Unimplemented)
    }

    pub fn run_fn(&self) -> Option<RunFn> {
        match &self.kind {
            TestKind::Runnable { run, .. } => Some(run.clone()),
            TestKind::Unimplemented => None,
        }
    }

    /// Lazily enumerate the surviving cases of this test.
    ///
    /// The spec regenerates deterministically, so this can be called once
    /// to count and again to execute.
    pub fn cases(&self) -> Box<dyn Iterator<Item = Result<CaseParams>>> {
        match &self.kind {
            TestKind::Runnable { spec, .. } => {
                let base = spec.cases();
                match &self.filter {
                    Some(filter) => {
                        let filter = filter.clone();
                        Box::new(base.filter_map(move |res| match res {
                            Ok(params) => match filter(&params) {
                                Ok(true) => Some(Ok(params)),
                                Ok(false) => None,
                                Err(e) => Some(Err(e)),
                            },
                            Err(e) => Some(Err(e)),
                        }))
                    }
                    None => Box::new(base),
                }
            }
            TestKind::Unimplemented => Box::new(std::iter::empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// TestGroup
// ---------------------------------------------------------------------------

/// A named collection of registered tests.
pub struct TestGroup {
    name: String,
    tests: Vec<Test>,
}

impl TestGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Begin registering a test under this group.
    pub fn test(&mut self, name: impl Into<String>) -> TestBuilder<'_> {
        TestBuilder {
            group: self,
            name: name.into(),
            description: String::new(),
            filter: None,
        }
    }

    /// Check registration invariants; duplicate test names are a usage
    /// error caught before any device work.
    pub fn validate(&self) -> Result<()> {
        for (i, test) in self.tests.iter().enumerate() {
            if self.tests[..i].iter().any(|t| t.name == test.name) {
                return Err(Error::usage(format!(
                    "test '{}' registered twice in group '{}'",
                    test.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Materialize every case of every runnable test, in registration
    /// order. Used to report counts and identities without a device.
    pub fn enumerate(&self) -> Result<Vec<TestCase>> {
        self.validate()?;
        let mut out = Vec::new();
        for test in &self.tests {
            for params in test.cases() {
                let params = params?;
                out.push(TestCase {
                    group: self.name.clone(),
                    test: test.name.clone(),
                    id: params.id_string(),
                    params,
                });
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for TestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestGroup")
            .field("name", &self.name)
            .field("tests", &self.tests.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Staged registration of a test; finish with [`cases`]+[`run`] or
/// [`unimplemented`].
///
/// [`cases`]: TestBuilder::cases
/// [`run`]: CasedTestBuilder::run
/// [`unimplemented`]: TestBuilder::unimplemented
pub struct TestBuilder<'g> {
    group: &'g mut TestGroup,
    name: String,
    description: String,
    filter: Option<CaseFilter>,
}

impl<'g> TestBuilder<'g> {
    /// Human-readable multi-line description; documentation only.
    pub fn desc(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Keep only the cases for which `filter` returns `true`.
    pub fn filter(mut self, filter: impl Fn(&CaseParams) -> Result<bool> + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }

    /// Attach the case spec.
    pub fn cases(self, spec: ParamSpec) -> CasedTestBuilder<'g> {
        CasedTestBuilder {
            builder: self,
            spec,
        }
    }

    /// Register a placeholder that always skips, carrying only the
    /// description.
    pub fn unimplemented(self) {
        let test = Test {
            name: self.name,
            description: self.description,
            filter: None,
            kind: TestKind::Unimplemented,
        };
        self.group.tests.push(test);
    }
}

/// A test registration with its case spec attached.
pub struct CasedTestBuilder<'g> {
    builder: TestBuilder<'g>,
    spec: ParamSpec,
}

impl CasedTestBuilder<'_> {
    /// Attach the run function and complete the registration.
    pub fn run(self, run: impl Fn(&mut Fixture) -> Result<()> + 'static) {
        let CasedTestBuilder { builder, spec } = self;
        let test = Test {
            name: builder.name,
            description: builder.description,
            filter: builder.filter,
            kind: TestKind::Runnable {
                spec,
                run: Rc::new(run),
            },
        };
        builder.group.tests.push(test);
    }
}
