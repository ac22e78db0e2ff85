//! Integration tests for the parameter-space algebra

mod common;

use common::case_ids;
use pretty_assertions::assert_eq;
use prism::group::TestGroup;
use prism::params::{params, ParamValue};

#[test]
fn combine_yields_row_major_product() {
    let spec = params()
        .combine("a", ["p", "q", "r"])
        .combine("b", [1, 2]);
    let ids: Vec<String> = spec
        .cases()
        .map(|c| c.map(|c| c.id_string()))
        .collect::<prism::Result<_>>()
        .unwrap();
    assert_eq!(
        ids,
        vec![
            "a=p;b=1", "a=p;b=2", //
            "a=q;b=1", "a=q;b=2", //
            "a=r;b=1", "a=r;b=2",
        ]
    );
}

#[test]
fn topology_indirect_unless_yields_three_cases() {
    // The canonical non-rectangular example: a restart-style exclusion
    // removes exactly one pairing.
    let spec = params()
        .combine("topology", ["point-list", "line-list"])
        .toggle("indirect")
        .unless(|p| Ok(p.str("topology")? == "point-list" && p.bool("indirect")?));

    let ids: Vec<String> = spec
        .cases()
        .map(|c| c.map(|c| c.id_string()))
        .collect::<prism::Result<_>>()
        .unwrap();
    assert_eq!(
        ids,
        vec![
            "topology=point-list;indirect=false",
            "topology=line-list;indirect=false",
            "topology=line-list;indirect=true",
        ]
    );
}

#[test]
fn case_generation_is_referentially_transparent() {
    let mut g = TestGroup::new("repeat");
    g.test("space")
        .cases(
            params()
                .combine("kind", ["a", "b", "c"])
                .toggle("flag")
                .subcases(|_| Ok(params().combine("n", [1, 2])))
                .unless(|p| Ok(p.str("kind")? == "b" && p.int("n")? == 2)),
        )
        .run(|_| Ok(()));

    let first = case_ids(&g).unwrap();
    let second = case_ids(&g).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3 * 2 * 2 - 2);
}

#[test]
fn expand_with_zero_fragments_removes_the_case() {
    let spec = params()
        .combine("keep", [true, false])
        .expand(|p| {
            let fragments = if p.bool("keep")? {
                vec![vec![("extra".to_string(), ParamValue::Int(1))]]
            } else {
                vec![]
            };
            Ok(fragments.into_iter())
        });
    let ids: Vec<String> = spec
        .cases()
        .map(|c| c.map(|c| c.id_string()))
        .collect::<prism::Result<_>>()
        .unwrap();
    assert_eq!(ids, vec!["keep=true;extra=1"]);
}

#[test]
fn heterogeneous_dimensions_are_looked_up_by_name() {
    // Expanded dimensions exist only for the cases that produced them;
    // downstream code must use name lookup, never position.
    let spec = params().combine("kind", ["plain", "counted"]).expand(|p| {
        let fragments = if p.str("kind")? == "counted" {
            vec![vec![("count".to_string(), ParamValue::Int(7))]]
        } else {
            vec![Vec::new()]
        };
        Ok(fragments.into_iter())
    });
    for case in spec.cases() {
        let case = case.unwrap();
        match case.str("kind").unwrap() {
            "counted" => assert_eq!(case.int("count").unwrap(), 7),
            _ => assert!(case.get("count").is_none()),
        }
    }
}

#[test]
fn generation_never_requires_a_device() {
    // Enumerating a group is pure data: no device, no fixture.
    let mut g = TestGroup::new("pure");
    g.test("wide")
        .cases(params().combine("i", 0..100i64).combine("j", 0..100i64))
        .run(|_| Ok(()));
    let cases = g.enumerate().unwrap();
    assert_eq!(cases.len(), 10_000);
}
