//! Integration tests for tree_rules::index
//!
//! These tests exercise joinable-pair discovery:
//! - prefix/suffix registration of identity chains
//! - the unexplained-positive and Jaccard-similarity pair filters
//! - stage-2 tree-order pre-filtering and pair deduplication

use roaring::RoaringBitmap;

use tree_rules::index::JoinIndex;
use tree_rules::rule::{Op, Predicate, Rule, TreeLeaf};

fn bitmap(rows: &[u32]) -> RoaringBitmap {
    rows.iter().copied().collect()
}

fn chain(pairs: &[(usize, usize)]) -> Vec<TreeLeaf> {
    pairs
        .iter()
        .map(|&(tree, leaf)| TreeLeaf::new(tree, leaf))
        .collect()
}

fn stage1(tree: usize, leaf: usize, feature: &str, rows: &[u32]) -> Rule {
    Rule::new(
        vec![Predicate::new(feature, Op::Gt, 0.5)],
        bitmap(rows),
        vec![chain(&[(tree, leaf)])],
    )
}

// ---------------------------
// Index registration
// ---------------------------

/// Stage-2 rules register under the length-1 prefix and suffix of each of
/// their chains.
#[test]
fn index_registers_prefixes_and_suffixes() {
    let rules = vec![
        Rule::new(
            vec![Predicate::new("f0", Op::Gt, 0.5)],
            bitmap(&[0]),
            vec![chain(&[(0, 1), (1, 1)])],
        ),
        Rule::new(
            vec![Predicate::new("f1", Op::Gt, 0.5)],
            bitmap(&[0]),
            vec![chain(&[(1, 1), (2, 0)])],
        ),
    ];
    let index = JoinIndex::index(&rules);

    // rule 0 ends where rule 1 begins
    assert_eq!(index.rules_with_suffix(&chain(&[(1, 1)])), Some(&[0][..]));
    assert_eq!(index.rules_with_prefix(&chain(&[(1, 1)])), Some(&[1][..]));
    assert_eq!(index.rules_with_prefix(&chain(&[(0, 1)])), Some(&[0][..]));
    assert!(index.rules_with_suffix(&chain(&[(9, 9)])).is_none());
}

// ---------------------------
// Pair filters
// ---------------------------

/// A pair sharing an unexplained positive with a modest support overlap is
/// accepted; orientation follows increasing tree order.
#[test]
fn accepts_dissimilar_pair_sharing_unexplained_positive() {
    let rules = vec![
        stage1(0, 2, "f0", &[0, 1, 2, 3, 4]),
        stage1(1, 2, "f1", &[0, 5, 6, 7, 8]),
    ];
    let unexplained = bitmap(&[0, 1, 5]);

    // overlap {0}, union of 9 rows: similarity 1/9
    let pairs = JoinIndex::joinable_pairs(&rules, &unexplained, 0.20);
    assert_eq!(pairs, vec![(0, 1)]);
}

/// Near-identical supports are redundant to combine and are filtered by
/// the Jaccard threshold.
#[test]
fn rejects_pair_with_similar_supports() {
    let rules = vec![
        stage1(0, 2, "f0", &[0, 1, 2, 3]),
        stage1(1, 2, "f1", &[0, 1, 2, 3]),
    ];
    let unexplained = bitmap(&[0, 1]);

    assert!(JoinIndex::joinable_pairs(&rules, &unexplained, 0.20).is_empty());
    // the same pair passes once the threshold admits it
    assert_eq!(
        JoinIndex::joinable_pairs(&rules, &unexplained, 1.0),
        vec![(0, 1)]
    );
}

/// A join that cannot newly explain a positive is useless, even when the
/// supports overlap.
#[test]
fn rejects_pair_without_unexplained_positive() {
    let rules = vec![
        stage1(0, 2, "f0", &[0, 1, 2, 3, 4, 5, 6, 7, 8]),
        stage1(1, 2, "f1", &[8, 9, 10, 11, 12, 13, 14, 15]),
    ];
    // row 8 is shared but already explained
    let unexplained = bitmap(&[20, 21]);

    assert!(JoinIndex::joinable_pairs(&rules, &unexplained, 0.20).is_empty());
}

#[test]
fn rejects_pair_with_disjoint_supports() {
    let rules = vec![
        stage1(0, 2, "f0", &[0, 1, 2]),
        stage1(1, 2, "f1", &[3, 4, 5]),
    ];
    let unexplained = bitmap(&[0, 3]);

    assert!(JoinIndex::joinable_pairs(&rules, &unexplained, 1.0).is_empty());
}

// ---------------------------
// Stage-2 tree ordering
// ---------------------------

/// Two leaf rules of the same tree share the empty chain overlap but can
/// never interleave into an increasing chain.
#[test]
fn rejects_same_tree_pair_at_stage_two() {
    let rules = vec![
        stage1(0, 2, "f0", &[0, 1, 2, 3, 4, 5, 6, 7, 8]),
        stage1(0, 5, "f1", &[0, 9, 10, 11, 12, 13, 14, 15]),
    ];
    let unexplained = bitmap(&[0]);

    assert!(JoinIndex::joinable_pairs(&rules, &unexplained, 1.0).is_empty());
}

/// (i, j) and (j, i) count as one candidate join: rules whose merged
/// identities span the same trees produce a single pair.
#[test]
fn deduplicates_mirrored_pairs() {
    let a = Rule::new(
        vec![Predicate::new("f0", Op::Gt, 0.5)],
        bitmap(&[0, 1, 2, 3, 4, 5, 6, 7, 8]),
        vec![chain(&[(0, 1)]), chain(&[(1, 4)])],
    );
    let b = Rule::new(
        vec![Predicate::new("f1", Op::Gt, 0.5)],
        bitmap(&[0, 9, 10, 11, 12, 13, 14, 15]),
        vec![chain(&[(0, 2)]), chain(&[(1, 6)])],
    );
    let unexplained = bitmap(&[0]);

    let pairs = JoinIndex::joinable_pairs(&[a, b], &unexplained, 1.0);
    assert_eq!(pairs.len(), 1, "mirrored orientations collapse to one join");
}

// ---------------------------
// Stage >= 2 chain matching
// ---------------------------

/// At stage 2 only suffix-to-prefix chain matches pair up; rules whose
/// chains do not continue each other are never proposed.
#[test]
fn pairs_follow_chain_continuation() {
    let rules = vec![
        Rule::new(
            vec![Predicate::new("f0", Op::Gt, 0.5)],
            bitmap(&[0, 1, 2, 3, 4, 5, 6, 7, 8]),
            vec![chain(&[(0, 1), (1, 1)])],
        ),
        Rule::new(
            vec![Predicate::new("f1", Op::Gt, 0.5)],
            bitmap(&[0, 9, 10, 11, 12, 13, 14, 15]),
            vec![chain(&[(1, 1), (2, 0)])],
        ),
        Rule::new(
            vec![Predicate::new("f2", Op::Gt, 0.5)],
            bitmap(&[0, 16, 17, 18, 19, 20, 21, 22]),
            vec![chain(&[(1, 3), (2, 4)])],
        ),
    ];
    let unexplained = bitmap(&[0]);

    // rule 0 continues into rule 1 through the shared (1, 1) link; rule 2
    // starts from a different leaf of tree 1 and stays unpaired
    assert_eq!(
        JoinIndex::joinable_pairs(&rules, &unexplained, 1.0),
        vec![(0, 1)]
    );
}
