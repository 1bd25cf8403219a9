//! Adapters from serialized source models to the common forest shape.
//!
//! Each supported model family is one variant of [`SourceModel`], carrying
//! the family's node arrays as dumped by the training side (sklearn-style
//! `children_left` / `children_right` / `feature` / `threshold` / `value`
//! vectors, `-1` marking leaves). A model is resolved into a
//! [`RandomForest`] exactly once, when the explainer is constructed.

use explainers::api::ExplainError;
use serde::Deserialize;

use crate::tree::{DecisionTree, EnsembleKind, RandomForest, TreeNode};

/// Node arrays of one dumped decision tree.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeDump {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

/// A dumped tree-ensemble classifier, tagged by model family.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model_type")]
pub enum SourceModel {
    /// Bagged trees whose leaves hold positive-class probabilities.
    #[serde(rename = "random_forest_classifier")]
    RandomForestClassifier { trees: Vec<TreeDump> },
    /// Boosted trees whose leaves hold raw additive scores, scaled by the
    /// learning rate on top of an initial score.
    #[serde(rename = "gradient_boosting_classifier")]
    GradientBoostingClassifier {
        trees: Vec<TreeDump>,
        learning_rate: f64,
        init_score: f64,
    },
}

impl SourceModel {
    pub fn from_json(raw: &str) -> Result<Self, ExplainError> {
        serde_json::from_str(raw).map_err(|e| ExplainError::InvalidInput(e.to_string()))
    }

    /// Resolve the dump into the common representation, mapping feature
    /// indices to `feature_names`. Leaf scaling happens here so the rest
    /// of the crate never sees family-specific score conventions.
    pub fn into_forest(self, feature_names: &[String]) -> Result<RandomForest, ExplainError> {
        match self {
            SourceModel::RandomForestClassifier { trees } => {
                let trees = convert_trees(&trees, feature_names, 1.0)?;
                Ok(RandomForest::new(trees, EnsembleKind::Averaged))
            }
            SourceModel::GradientBoostingClassifier {
                trees,
                learning_rate,
                init_score,
            } => {
                let trees = convert_trees(&trees, feature_names, learning_rate)?;
                Ok(RandomForest::new(
                    trees,
                    EnsembleKind::Additive { bias: init_score },
                ))
            }
        }
    }
}

fn convert_trees(
    dumps: &[TreeDump],
    feature_names: &[String],
    leaf_scale: f64,
) -> Result<Vec<DecisionTree>, ExplainError> {
    dumps
        .iter()
        .enumerate()
        .map(|(tree_index, dump)| convert_tree(tree_index, dump, feature_names, leaf_scale))
        .collect()
}

fn convert_tree(
    tree_index: usize,
    dump: &TreeDump,
    feature_names: &[String],
    leaf_scale: f64,
) -> Result<DecisionTree, ExplainError> {
    let n = dump.children_left.len();
    if n == 0
        || dump.children_right.len() != n
        || dump.feature.len() != n
        || dump.threshold.len() != n
        || dump.value.len() != n
    {
        return Err(ExplainError::InvalidInput(format!(
            "tree {}: node arrays are empty or of mismatched lengths",
            tree_index
        )));
    }

    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let left = dump.children_left[i];
        let right = dump.children_right[i];
        if left < 0 || right < 0 {
            // sklearn marks both children -1 on leaves
            nodes.push(TreeNode::Leaf {
                value: dump.value[i] * leaf_scale,
            });
            continue;
        }
        let feature_index = dump.feature[i];
        let feature = usize::try_from(feature_index)
            .ok()
            .and_then(|idx| feature_names.get(idx))
            .ok_or_else(|| {
                ExplainError::InvalidInput(format!(
                    "tree {}: node {} references feature index {} outside the {} known features",
                    tree_index,
                    i,
                    feature_index,
                    feature_names.len()
                ))
            })?;
        let left = left as usize;
        let right = right as usize;
        if left >= n || right >= n {
            return Err(ExplainError::InvalidInput(format!(
                "tree {}: node {} points at child outside the node arena",
                tree_index, i
            )));
        }
        nodes.push(TreeNode::Internal {
            feature: feature.clone(),
            threshold: dump.threshold[i],
            left,
            right,
        });
    }
    Ok(DecisionTree::new(nodes))
}
