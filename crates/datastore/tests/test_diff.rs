//! Tests using the `diff_scenarios.json` test vectors.

mod common;

use datastore::{Document, PrintOptions, apply_diff, compute_diff, json};
use serde::Deserialize;

#[derive(Deserialize)]
struct DiffCase {
    description: String,
    a: serde_json::Value,
    b: serde_json::Value,
    diff: String,
}

fn load_vectors() -> Vec<DiffCase> {
    let json = include_str!("vectors/diff_scenarios.json");
    serde_json::from_str(json).expect("failed to parse diff_scenarios.json")
}

fn sorted_text(doc: &Document) -> String {
    doc.to_text(doc.root(), PrintOptions::default().sorted())
        .unwrap()
}

fn same(a: &Document, b: &Document) -> bool {
    Document::equals(a, a.root(), b, b.root(), true)
}

#[test]
fn test_diff_scenarios() {
    common::init_tracing();
    for case in load_vectors() {
        let a = common::doc_from_value(&case.a);
        let b = common::doc_from_value(&case.b);
        let diff = compute_diff(&a, &b).unwrap();
        assert!(diff.verify_integrity(), "{}", case.description);
        assert_eq!(sorted_text(&diff), case.diff, "{}", case.description);
    }
}

#[test]
fn test_applied_diff_reproduces_target() {
    for case in load_vectors() {
        let mut a = common::doc_from_value(&case.a);
        let b = common::doc_from_value(&case.b);
        let diff = compute_diff(&a, &b).unwrap();
        apply_diff(&diff, &mut a).unwrap();
        assert!(a.verify_integrity(), "{}", case.description);
        assert!(same(&a, &b), "{}: got {}", case.description, sorted_text(&a));
    }
}

#[test]
fn test_applying_twice_is_stable() {
    for case in load_vectors() {
        let mut a = common::doc_from_value(&case.a);
        let b = common::doc_from_value(&case.b);
        let diff = compute_diff(&a, &b).unwrap();
        apply_diff(&diff, &mut a).unwrap();
        let once = a.compute_md5().unwrap();
        apply_diff(&diff, &mut a).unwrap();
        assert_eq!(a.compute_md5().unwrap(), once, "{}", case.description);
    }
}

#[test]
fn test_diff_of_identical_documents_is_empty() {
    for case in load_vectors() {
        let b = common::doc_from_value(&case.b);
        let diff = compute_diff(&b, &b).unwrap();
        let mut target = common::doc_from_value(&case.b);
        let before = target.save().unwrap();
        apply_diff(&diff, &mut target).unwrap();
        assert_eq!(target.save().unwrap(), before, "{}", case.description);
    }
}

#[test]
fn test_empty_documents() {
    let empty = Document::new();
    let table = json::from_json(r#"{"k": [1]}"#).unwrap();

    let diff = compute_diff(&empty, &empty).unwrap();
    assert!(diff.root().is_null());

    let diff = compute_diff(&empty, &table).unwrap();
    assert_eq!(sorted_text(&diff), r#"{"k":[1]}"#);
    let mut target = Document::new();
    apply_diff(&diff, &mut target).unwrap();
    assert!(same(&target, &table));

    let diff = compute_diff(&table, &empty).unwrap();
    assert_eq!(sorted_text(&diff), r#"{"k":null}"#);
}

#[test]
fn test_hand_written_patch() {
    let options = json::JsonOptions {
        null_as_special_erase: true,
    };
    let patch = json::from_json_with(r#"{"gone": null, "missing": null, "n": {"x": 1}}"#, options)
        .unwrap();
    let mut target = json::from_json(r#"{"gone": true, "kept": "k", "n": {"y": 2}}"#).unwrap();
    apply_diff(&patch, &mut target).unwrap();
    assert_eq!(
        sorted_text(&target),
        r#"{"kept":"k","n":{"x":1,"y":2}}"#
    );
}
