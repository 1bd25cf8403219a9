//! Public surface for explaining a tree ensemble with a rule list.

use explainers::api::{ExplainError, Explainer, PredictError};
use polars::prelude::*;
use roaring::RoaringBitmap;

use crate::adapter::SourceModel;
use crate::builder::RuleBuilder;
use crate::eval::FeatureFrame;
use crate::rule::{Predicate, Rule, RuleRecord};
use crate::tree::RandomForest;

pub const DEFAULT_MIN_PRECISION: f64 = 0.95;
pub const DEFAULT_JACCARD_THRESHOLD: f64 = 0.20;

/// Explains the positive-class predictions of a binary tree-ensemble
/// classifier with a short list of conjunctive threshold rules.
///
/// The source model is resolved into the common forest shape once, at
/// construction. Each [`ModelExplainer::explain_with`] call runs the full
/// staged search and replaces any previously extracted rules; the query
/// operations (`predict`, `get_fidelity`,
/// [`ModelExplainer::explain_instance_with_rules`]) read the rules of the
/// most recent call.
#[derive(Debug)]
pub struct ModelExplainer {
    feature_names: Vec<String>,
    forest: RandomForest,
    builder: Option<RuleBuilder>,
}

impl ModelExplainer {
    /// Resolve a dumped source model against its feature names. Feature
    /// names may only contain alphanumeric characters and underscores, so
    /// every rule renders to an unambiguous conjunction string.
    pub fn new(model: SourceModel, feature_names: Vec<String>) -> Result<Self, ExplainError> {
        validate_feature_names(&feature_names)?;
        let forest = model.into_forest(&feature_names)?;
        Ok(ModelExplainer {
            feature_names,
            forest,
            builder: None,
        })
    }

    /// Wrap an already-materialized forest.
    pub fn from_forest(
        forest: RandomForest,
        feature_names: Vec<String>,
    ) -> Result<Self, ExplainError> {
        validate_feature_names(&feature_names)?;
        Ok(ModelExplainer {
            feature_names,
            forest,
            builder: None,
        })
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    /// The wrapped ensemble's own 0/1 predictions for `x`; these are the
    /// labels `explain` expects, so the extracted rules stay faithful to
    /// the model rather than to ground truth.
    pub fn model_predictions(&self, x: &DataFrame) -> Result<Vec<u8>, PredictError> {
        let frame = self.frame_for_predict(x)?;
        Ok(self.forest.predict(&frame))
    }

    /// Run the staged search with explicit parameters. `num_stages` of
    /// `None` explores up to one stage per tree.
    pub fn explain_with(
        &mut self,
        x: &DataFrame,
        y: &[u8],
        num_stages: Option<usize>,
        min_precision: f64,
        jaccard_threshold: f64,
    ) -> Result<Vec<String>, ExplainError> {
        if x.height() != y.len() {
            return Err(ExplainError::InvalidInput(
                "x and y should have the same length".to_string(),
            ));
        }
        if y.iter().any(|&label| label > 1) {
            return Err(ExplainError::InvalidInput(
                "entries of y should only be 0 or 1".to_string(),
            ));
        }
        let frame = FeatureFrame::from_dataframe(x, &self.feature_names)
            .map_err(|e| ExplainError::InvalidInput(e.to_string()))?;

        let mut builder = RuleBuilder::new(num_stages, min_precision, jaccard_threshold);
        let rules = builder.explain(&self.forest, &frame, y);
        self.builder = Some(builder);

        Ok(rules.iter().map(|rule| rule.to_string()).collect())
    }

    /// Selected rule strings of the most recent explain call.
    pub fn rules(&self) -> Vec<String> {
        self.builder
            .as_ref()
            .map(|builder| {
                builder
                    .solution_rules()
                    .iter()
                    .map(|rule| rule.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pre-cover rule strings of the most recent explain call.
    pub fn longer_rules(&self) -> Vec<String> {
        self.builder
            .as_ref()
            .map(|builder| {
                builder
                    .longer_rules()
                    .iter()
                    .map(|rule| rule.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Persistable summaries (rule string, support size, precision) of the
    /// selected rules.
    pub fn rule_records(&self) -> Vec<RuleRecord> {
        self.builder
            .as_ref()
            .map(|builder| builder.rule_records())
            .unwrap_or_default()
    }

    /// Fidelity of the extracted rule list, `(overall, positives,
    /// negatives)`. With `x` and `y` both given the rules are re-evaluated
    /// on that data; otherwise the fidelity on the explain call's own data
    /// is returned.
    pub fn get_fidelity(
        &self,
        x: Option<&DataFrame>,
        y: Option<&[u8]>,
    ) -> Result<(f64, f64, f64), PredictError> {
        let builder = self.builder.as_ref().ok_or(PredictError::NotExplained)?;
        let (Some(x), Some(y)) = (x, y) else {
            return Ok(builder.get_fidelity());
        };

        if x.height() != y.len() {
            return Err(PredictError::InvalidInput(
                "x and y should have the same length".to_string(),
            ));
        }
        let frame = self.frame_for_predict(x)?;
        let y_rules = builder.apply(&frame);

        let mut positives = 0u64;
        let mut negatives = 0u64;
        let mut agree_positives = 0u64;
        let mut agree_negatives = 0u64;
        for (&label, &predicted) in y.iter().zip(y_rules.iter()) {
            if label == 1 {
                positives += 1;
                if predicted == 1 {
                    agree_positives += 1;
                }
            } else {
                negatives += 1;
                if predicted == 0 {
                    agree_negatives += 1;
                }
            }
        }
        Ok((
            ratio(agree_positives + agree_negatives, positives + negatives),
            ratio(agree_positives, positives),
            ratio(agree_negatives, negatives),
        ))
    }

    /// For every row of `x`, the rules satisfied by that row, each of
    /// which independently explains the row's positive prediction. Rows
    /// the rule list does not cover (in particular model-negative rows)
    /// come back empty. `explore_all_rules` consults the full pre-cover
    /// pool instead of the condensed selection.
    pub fn explain_instance_with_rules(
        &self,
        x: &DataFrame,
        explore_all_rules: bool,
    ) -> Result<Vec<Vec<String>>, PredictError> {
        let builder = self.builder.as_ref().ok_or(PredictError::NotExplained)?;
        let pool: &[Rule] = if explore_all_rules {
            builder.longer_rules()
        } else {
            builder.solution_rules()
        };
        let frame = self.frame_for_predict(x)?;

        let mut explanations: Vec<Vec<String>> = vec![Vec::new(); frame.height()];
        for rule in pool {
            let support = frame.rule_support(rule.predicates());
            for row in support {
                explanations[row as usize].push(rule.to_string());
            }
        }
        Ok(explanations)
    }

    /// Maximally shorten each extracted rule by dropping one predicate at
    /// a time, keeping a drop only while the re-evaluated precision on
    /// `(x, y)` stays at or above `min_precision` (the explain call's
    /// threshold when `None`). Returns one pruned rule string per rule of
    /// the chosen pool; ties on length resolve to the best precision.
    ///
    /// This trades precision (down to the threshold) for shorter rules and
    /// is never invoked by the core search.
    pub fn prune_rules_by_dropping_terms(
        &self,
        x: &DataFrame,
        y: &[u8],
        min_precision: Option<f64>,
        explore_all_rules: bool,
    ) -> Result<Vec<String>, PredictError> {
        let builder = self.builder.as_ref().ok_or(PredictError::NotExplained)?;
        if x.height() != y.len() {
            return Err(PredictError::InvalidInput(
                "x and y should have the same length".to_string(),
            ));
        }
        let min_precision = min_precision.unwrap_or(builder.min_precision());
        let pool: &[Rule] = if explore_all_rules {
            builder.longer_rules()
        } else {
            builder.solution_rules()
        };
        let frame = self.frame_for_predict(x)?;
        let positives: RoaringBitmap = y
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == 1)
            .map(|(row, _)| row as u32)
            .collect();

        Ok(pool
            .iter()
            .map(|rule| drop_terms(rule, &frame, &positives, min_precision))
            .collect())
    }

    fn frame_for_predict(&self, x: &DataFrame) -> Result<FeatureFrame, PredictError> {
        FeatureFrame::from_dataframe(x, &self.feature_names)
            .map_err(|e| PredictError::InvalidInput(e.to_string()))
    }
}

impl Explainer for ModelExplainer {
    fn _explain_impl(&mut self, x: &DataFrame, y: &[u8]) -> Result<Vec<String>, ExplainError> {
        self.explain_with(
            x,
            y,
            None,
            DEFAULT_MIN_PRECISION,
            DEFAULT_JACCARD_THRESHOLD,
        )
    }

    fn _predict_impl(&self, x: &DataFrame) -> Result<Vec<u8>, PredictError> {
        let builder = self.builder.as_ref().ok_or(PredictError::NotExplained)?;
        let frame = self.frame_for_predict(x)?;
        Ok(builder.apply(&frame))
    }

    fn _fidelity_impl(
        &self,
        x: Option<&DataFrame>,
        y: Option<&[u8]>,
    ) -> Result<(f64, f64, f64), PredictError> {
        self.get_fidelity(x, y)
    }
}

fn validate_feature_names(feature_names: &[String]) -> Result<(), ExplainError> {
    for name in feature_names {
        let well_formed =
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(ExplainError::InvalidInput(format!(
                "only alphanumeric characters and underscores are allowed in feature names, \
                 but found: {}",
                name
            )));
        }
    }
    Ok(())
}

/// Breadth-first single-term drops: every variant of the current
/// generation with one predicate removed survives into the next when its
/// precision holds the threshold; the search stops when no variant
/// survives and answers from the last surviving generation.
fn drop_terms(
    rule: &Rule,
    frame: &FeatureFrame,
    positives: &RoaringBitmap,
    min_precision: f64,
) -> String {
    let mut generation: Vec<Vec<Predicate>> = vec![rule.predicates().to_vec()];

    loop {
        let mut next: Vec<Vec<Predicate>> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for variant in &generation {
            if variant.len() <= 1 {
                continue;
            }
            for dropped in 0..variant.len() {
                let mut shorter = variant.clone();
                shorter.remove(dropped);
                let key = render_conjunction(&shorter);
                if seen.contains(&key) {
                    continue;
                }
                if precision_on(&shorter, frame, positives) >= min_precision {
                    seen.push(key);
                    next.push(shorter);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        generation = next;
    }

    // All survivors have equal length; keep the most precise one.
    let best = generation
        .iter()
        .max_by(|a, b| {
            precision_on(a, frame, positives).total_cmp(&precision_on(b, frame, positives))
        })
        .expect("a generation is never empty");
    render_conjunction(best)
}

fn precision_on(predicates: &[Predicate], frame: &FeatureFrame, positives: &RoaringBitmap) -> f64 {
    let support = frame.rule_support(predicates);
    if support.is_empty() {
        return 0.0;
    }
    support.intersection_len(positives) as f64 / support.len() as f64
}

fn render_conjunction(predicates: &[Predicate]) -> String {
    let mut sorted = predicates.to_vec();
    sorted.sort_by(|a, b| a.canonical_cmp(b));
    sorted
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" & ")
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
