//! Common representation of a fitted tree ensemble.
//!
//! Every supported source model family resolves (through [`crate::adapter`])
//! into this one shape: binary trees of `feature <= threshold` splits with
//! scored leaves, combined either by probability averaging or by summing
//! boosted scores through a sigmoid link. The explainer only ever sees this
//! representation; it does not know how the trees were trained.

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::eval::FeatureFrame;
use crate::rule::{Op, Predicate, Rule, TreeLeaf};

/// One node of a decision tree. Rows with `feature <= threshold` go left,
/// rows with `feature > threshold` go right; a missing value follows
/// neither branch.
#[derive(Debug, Clone)]
pub enum TreeNode {
    Internal {
        feature: String,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A binary decision tree stored as a node arena with the root at index 0.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        debug_assert!(!nodes.is_empty(), "a tree has at least its root");
        DecisionTree { nodes }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Raw leaf score for one data row, walking from the root.
    pub fn score_row(&self, frame: &FeatureFrame, row: u32) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => match frame.value(feature, row) {
                    Some(v) if v <= *threshold => index = *left,
                    Some(_) => index = *right,
                    // Missing value: no branch matches, score nothing.
                    None => return 0.0,
                },
            }
        }
    }

    /// Materialize every root-to-leaf decision path as a stage-1 rule.
    ///
    /// The row set is split at each internal node instead of re-evaluating
    /// the full conjunction per leaf, so each rule's support is consistent
    /// with its predicates by construction. The identity of each rule is
    /// the single `(tree_index, leaf_node_index)` pair of its source leaf.
    pub fn leaf_rules(&self, tree_index: usize, frame: &FeatureFrame) -> Vec<Rule> {
        let mut rules = Vec::new();
        let mut stack: Vec<(usize, Vec<Predicate>, RoaringBitmap)> =
            vec![(0, Vec::new(), frame.all_rows())];

        while let Some((index, predicates, support)) = stack.pop() {
            match &self.nodes[index] {
                TreeNode::Leaf { .. } => {
                    rules.push(Rule::new(
                        predicates,
                        support,
                        vec![vec![TreeLeaf::new(tree_index, index)]],
                    ));
                }
                TreeNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let values = frame.column(feature);
                    let mut left_support = RoaringBitmap::new();
                    let mut right_support = RoaringBitmap::new();
                    if let Some(values) = values {
                        for row in &support {
                            match values.get(row as usize).copied().flatten() {
                                Some(v) if v <= *threshold => {
                                    left_support.insert(row);
                                }
                                Some(_) => {
                                    right_support.insert(row);
                                }
                                None => {}
                            }
                        }
                    }

                    let mut left_predicates = predicates.clone();
                    left_predicates.push(Predicate::new(feature.clone(), Op::Le, *threshold));
                    stack.push((*left, left_predicates, left_support));

                    let mut right_predicates = predicates;
                    right_predicates.push(Predicate::new(feature.clone(), Op::Gt, *threshold));
                    stack.push((*right, right_predicates, right_support));
                }
            }
        }
        rules
    }
}

/// How per-tree leaf scores combine into the ensemble's prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnsembleKind {
    /// Leaves carry positive-class probabilities; the ensemble averages
    /// them and predicts positive at 0.5.
    Averaged,
    /// Leaves carry additive raw scores on top of a base score; the
    /// ensemble predicts positive when the sigmoid of the sum reaches 0.5.
    Additive { bias: f64 },
}

/// The common tree-ensemble shape all adapters resolve into.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    kind: EnsembleKind,
}

impl RandomForest {
    pub fn new(trees: Vec<DecisionTree>, kind: EnsembleKind) -> Self {
        RandomForest { trees, kind }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    /// Stage-1 candidate rules: every leaf decision path of every tree,
    /// with supports computed against `frame`.
    pub fn get_rules(&self, frame: &FeatureFrame) -> Vec<Rule> {
        self.trees
            .par_iter()
            .enumerate()
            .map(|(tree_index, tree)| tree.leaf_rules(tree_index, frame))
            .flatten()
            .collect()
    }

    /// Combined ensemble score for one row.
    pub fn score_row(&self, frame: &FeatureFrame, row: u32) -> f64 {
        let sum: f64 = self
            .trees
            .iter()
            .map(|tree| tree.score_row(frame, row))
            .sum();
        match self.kind {
            EnsembleKind::Averaged => {
                if self.trees.is_empty() {
                    0.0
                } else {
                    sum / self.trees.len() as f64
                }
            }
            EnsembleKind::Additive { bias } => sigmoid(bias + sum),
        }
    }

    /// The ensemble's own 0/1 predictions for every row of `frame`.
    pub fn predict(&self, frame: &FeatureFrame) -> Vec<u8> {
        (0..frame.height() as u32)
            .into_par_iter()
            .map(|row| u8::from(self.score_row(frame, row) >= 0.5))
            .collect()
    }
}

fn sigmoid(score: f64) -> f64 {
    1.0 / (1.0 + (-score).exp())
}
