//! Integration tests for tree_rules::eval
//!
//! These tests exercise predicate evaluation over polars DataFrames:
//! correctness of conjunction supports against hand-filtered rows and the
//! treatment of missing values and unknown features.

use polars::prelude::*;

use tree_rules::eval::FeatureFrame;
use tree_rules::rule::{Op, Predicate};

fn build_frame() -> FeatureFrame {
    let f0 = Series::new(
        PlSmallStr::from_static("f0"),
        &[Some(0.0_f64), Some(1.0), Some(2.0), None],
    );
    let f1 = Series::new(
        PlSmallStr::from_static("f1"),
        &[Some(5.0_f64), Some(4.0), Some(3.0), Some(2.0)],
    );
    let df = DataFrame::new(vec![f0.into(), f1.into()]).unwrap();
    FeatureFrame::from_dataframe(&df, &["f0".to_string(), "f1".to_string()]).unwrap()
}

#[test]
fn support_of_conjunction_matches_hand_filter() {
    let frame = build_frame();
    let support = frame.rule_support(&[
        Predicate::new("f0", Op::Gt, 0.5),
        Predicate::new("f1", Op::Le, 4.0),
    ]);
    // rows 1 and 2 pass both; row 3 has a null f0 and drops out
    assert_eq!(support.iter().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn empty_conjunction_covers_all_rows() {
    let frame = build_frame();
    assert_eq!(frame.rule_support(&[]).len(), 4);
    assert_eq!(frame.height(), 4);
}

#[test]
fn missing_values_satisfy_no_predicate() {
    let frame = build_frame();
    let below = frame.rule_support(&[Predicate::new("f0", Op::Le, 10.0)]);
    let above = frame.rule_support(&[Predicate::new("f0", Op::Gt, 10.0)]);
    assert!(!below.contains(3));
    assert!(!above.contains(3));
    assert_eq!(below.len() + above.len(), 3);
}

#[test]
fn unknown_feature_yields_empty_support() {
    let frame = build_frame();
    let support = frame.rule_support(&[Predicate::new("missing", Op::Lt, 1.0)]);
    assert!(support.is_empty());
}

#[test]
fn integer_columns_are_cast_for_evaluation() {
    let age = Series::new(PlSmallStr::from_static("age"), &[30i64, 40, 50]);
    let df = DataFrame::new(vec![age.into()]).unwrap();
    let frame = FeatureFrame::from_dataframe(&df, &["age".to_string()]).unwrap();

    let support = frame.rule_support(&[Predicate::new("age", Op::Ge, 40.0)]);
    assert_eq!(support.iter().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn missing_column_fails_fast() {
    let f0 = Series::new(PlSmallStr::from_static("f0"), &[1.0_f64]);
    let df = DataFrame::new(vec![f0.into()]).unwrap();
    assert!(FeatureFrame::from_dataframe(&df, &["f9".to_string()]).is_err());
}
