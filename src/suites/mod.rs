//! Shipped conformance suites.
//!
//! Each suite builds a [`TestGroup`] from the harness primitives; the
//! bodies are deliberately mechanical - declare the parameter space,
//! compute ground truth through the oracle, issue device work, verify.

pub mod blending;
pub mod topology;

use crate::group::TestGroup;

/// Every shipped suite, in run order.
pub fn all() -> Vec<TestGroup> {
    vec![blending::test_group(), topology::test_group()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_names_are_unique() {
        let groups = all();
        for (i, group) in groups.iter().enumerate() {
            assert!(groups[..i].iter().all(|g| g.name() != group.name()));
            group.validate().unwrap();
        }
    }
}
