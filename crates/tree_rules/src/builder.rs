//! Staged candidate search over leaf rules.
//!
//! [`RuleBuilder`] owns all mutable state of one `explain` call. Stage 1
//! seeds candidates from individual tree leaves; every later stage joins
//! surviving candidates from k-tree combinations into (k+1)-tree
//! combinations, promotes candidates whose precision reaches the
//! threshold, and prunes everything that can no longer explain an
//! uncovered positive. Post-processing shortens, deduplicates, and
//! reduces the accumulated solutions with a greedy set cover.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;

use log::{debug, info};
use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::eval::FeatureFrame;
use crate::index::JoinIndex;
use crate::rule::{Predicate, Rule, RuleRecord};
use crate::tree::RandomForest;

#[derive(Debug)]
pub struct RuleBuilder {
    num_stages: Option<usize>,
    min_precision: f64,
    jaccard_threshold: f64,
    // state of the current explain call
    labels: Vec<u8>,
    positives: RoaringBitmap,
    positives_to_explain: RoaringBitmap,
    candidate_rules: Vec<Rule>,
    solution_rules: Vec<Rule>,
    longer_rules: Vec<Rule>,
}

impl RuleBuilder {
    /// `num_stages` of `None` explores every stage up to the tree count.
    pub fn new(num_stages: Option<usize>, min_precision: f64, jaccard_threshold: f64) -> Self {
        RuleBuilder {
            num_stages,
            min_precision,
            jaccard_threshold,
            labels: Vec::new(),
            positives: RoaringBitmap::new(),
            positives_to_explain: RoaringBitmap::new(),
            candidate_rules: Vec::new(),
            solution_rules: Vec::new(),
            longer_rules: Vec::new(),
        }
    }

    /// Extract the rule list explaining the positive-class predictions
    /// `labels` of the ensemble on the rows of `frame`.
    ///
    /// `labels` are the model's own predictions, not ground truth: the
    /// search optimizes faithfulness to the model. An empty result is a
    /// valid outcome when no rule reaches the precision threshold.
    pub fn explain(
        &mut self,
        forest: &RandomForest,
        frame: &FeatureFrame,
        labels: &[u8],
    ) -> Vec<Rule> {
        self.labels = labels.to_vec();
        self.positives = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == 1)
            .map(|(row, _)| row as u32)
            .collect();
        self.solution_rules.clear();
        self.longer_rules.clear();
        info!("{} positives to explain", self.positives.len());

        let stage_limit = self
            .num_stages
            .unwrap_or(forest.num_trees())
            .min(forest.num_trees());

        self.candidate_rules = forest
            .get_rules(frame)
            .into_iter()
            .filter(|rule| rule.num_predicates() > 0)
            .collect();
        debug!("{} leaf rules extracted", self.candidate_rules.len());
        self.candidate_rules = deduplicate(mem::take(&mut self.candidate_rules));
        debug!("{} leaf rules after dedup", self.candidate_rules.len());

        self.generate_solutions(stage_limit);

        self.solution_rules = shorten(mem::take(&mut self.solution_rules));
        self.solution_rules = deduplicate(mem::take(&mut self.solution_rules));
        info!("{} solutions after simplification", self.solution_rules.len());

        // The pre-cover pool is kept for instance-level explanations.
        self.longer_rules = self.solution_rules.clone();

        let mut total_support = RoaringBitmap::new();
        for rule in &self.solution_rules {
            total_support |= rule.support();
        }
        let explained = total_support & &self.positives;
        self.cover_positives(&explained);
        info!("{} rules selected by set cover", self.solution_rules.len());

        self.solution_rules.clone()
    }

    /// One pass of the staged search. Every stage fully classifies its
    /// candidates and updates the unexplained-positive set before the next
    /// stage generates joins, because pruning and joinability both depend
    /// on the updated set.
    fn generate_solutions(&mut self, stage_limit: usize) {
        self.positives_to_explain = self.positives.clone();

        for stage in 0..stage_limit {
            if self.positives_to_explain.is_empty() {
                break;
            }
            if self.candidate_rules.is_empty() {
                break;
            }

            let candidates = if stage == 0 {
                mem::take(&mut self.candidate_rules)
            } else {
                let pairs = JoinIndex::joinable_pairs(
                    &self.candidate_rules,
                    &self.positives_to_explain,
                    self.jaccard_threshold,
                );
                debug!("stage {}: {} joinable pairs", stage + 1, pairs.len());
                let pool = &self.candidate_rules;
                let mut joined: Vec<Rule> = pairs
                    .par_iter()
                    .filter_map(|&(i, j)| pool[i].join(&pool[j]))
                    .collect();
                joined.sort_by(|a, b| a.canonical().cmp(b.canonical()));
                joined
            };

            let (new_solutions, new_candidates) = self.classify_candidates(candidates);
            info!(
                "stage {}: {} candidates kept, {} new solutions",
                stage + 1,
                new_candidates.len(),
                new_solutions.len()
            );
            self.candidate_rules = new_candidates;

            for rule in &new_solutions {
                self.positives_to_explain -= rule.support();
            }
            self.solution_rules.extend(new_solutions);
            debug!("{} positives still unexplained", self.positives_to_explain.len());

            let unexplained = &self.positives_to_explain;
            self.candidate_rules
                .retain(|rule| !rule.support().is_disjoint(unexplained));

            self.candidate_rules = deduplicate(mem::take(&mut self.candidate_rules));
            self.solution_rules = deduplicate(mem::take(&mut self.solution_rules));

            let (fidelity, fidelity_positives, fidelity_negatives) = self.get_fidelity();
            debug!(
                "fidelity total {:.6}, positive {:.6}, negative {:.6}",
                fidelity, fidelity_positives, fidelity_negatives
            );
        }
    }

    /// Split candidates into promoted solutions and retained candidates;
    /// everything else is dropped. Classification of one candidate is
    /// independent of the others, so the pool is scored in parallel.
    fn classify_candidates(&self, candidates: Vec<Rule>) -> (Vec<Rule>, Vec<Rule>) {
        let classified: Vec<(Rule, bool, bool)> = candidates
            .into_par_iter()
            .map(|rule| {
                let (is_solution, keep_candidate) = self.filter_candidate(&rule);
                (rule, is_solution, keep_candidate)
            })
            .collect();

        let mut solutions = Vec::new();
        let mut kept = Vec::new();
        for (rule, is_solution, keep_candidate) in classified {
            if is_solution {
                solutions.push(rule);
            } else if keep_candidate {
                kept.push(rule);
            }
        }
        (solutions, kept)
    }

    /// A candidate is a solution when its precision reaches the threshold,
    /// dropped when its support holds no positive at all (it can never
    /// become a solution), and retained otherwise.
    fn filter_candidate(&self, rule: &Rule) -> (bool, bool) {
        if rule.support().is_empty() {
            return (false, false);
        }
        if rule.is_solution(&self.positives, self.min_precision) {
            return (true, false);
        }
        let positive_support = rule.support().intersection_len(&self.positives);
        (false, positive_support > 0)
    }

    /// Greedy set cover: repeatedly select the rule covering the most
    /// still-uncovered positives, tie-broken by fewest predicates, until
    /// nothing remains or no rule covers a remaining row.
    fn cover_positives(&mut self, positives: &RoaringBitmap) {
        let mut coverage: Vec<(usize, RoaringBitmap)> = self
            .solution_rules
            .iter()
            .enumerate()
            .map(|(index, rule)| (index, rule.support().clone() & positives))
            .collect();
        coverage.retain(|(_, covered)| !covered.is_empty());

        let mut selected: Vec<usize> = Vec::new();
        let mut covered_count: u64 = 0;

        while covered_count < positives.len() && selected.len() < self.solution_rules.len() {
            if coverage.is_empty() {
                break;
            }
            let mut best = 0;
            for candidate in 1..coverage.len() {
                let (rule_index, covered) = &coverage[candidate];
                let (best_index, best_covered) = &coverage[best];
                if covered.len() > best_covered.len()
                    || (covered.len() == best_covered.len()
                        && self.solution_rules[*rule_index].num_predicates()
                            < self.solution_rules[*best_index].num_predicates())
                {
                    best = candidate;
                }
            }

            let (rule_index, newly_covered) = coverage.remove(best);
            selected.push(rule_index);
            covered_count += newly_covered.len();

            for (_, covered) in &mut coverage {
                *covered -= &newly_covered;
            }
            coverage.retain(|(_, covered)| !covered.is_empty());
        }

        self.solution_rules = selected
            .into_iter()
            .map(|index| self.solution_rules[index].clone())
            .collect();
    }

    /// Fidelity of the current rule list on the labels of the explain
    /// call, as `(overall, positives, negatives)`.
    pub fn get_fidelity(&self) -> (f64, f64, f64) {
        let mut support = RoaringBitmap::new();
        for rule in &self.solution_rules {
            support |= rule.support();
        }

        let mut positives = 0u64;
        let mut negatives = 0u64;
        let mut agree_positives = 0u64;
        let mut agree_negatives = 0u64;
        for (row, &label) in self.labels.iter().enumerate() {
            let predicted = support.contains(row as u32);
            if label == 1 {
                positives += 1;
                if predicted {
                    agree_positives += 1;
                }
            } else {
                negatives += 1;
                if !predicted {
                    agree_negatives += 1;
                }
            }
        }

        (
            ratio(agree_positives + agree_negatives, positives + negatives),
            ratio(agree_positives, positives),
            ratio(agree_negatives, negatives),
        )
    }

    /// Rule-list predictions for the rows of `frame`: positive when at
    /// least one selected rule's conjunction is satisfied.
    pub fn apply(&self, frame: &FeatureFrame) -> Vec<u8> {
        let mut coverage = RoaringBitmap::new();
        for rule in &self.solution_rules {
            coverage |= frame.rule_support(rule.predicates());
        }
        (0..frame.height() as u32)
            .map(|row| u8::from(coverage.contains(row)))
            .collect()
    }

    pub fn solution_rules(&self) -> &[Rule] {
        &self.solution_rules
    }

    /// The pre-cover solution pool (shortened and deduplicated).
    pub fn longer_rules(&self) -> &[Rule] {
        &self.longer_rules
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn positives(&self) -> &RoaringBitmap {
        &self.positives
    }

    pub fn min_precision(&self) -> f64 {
        self.min_precision
    }

    /// Persistable summaries of the selected rules.
    pub fn rule_records(&self) -> Vec<RuleRecord> {
        self.solution_rules
            .iter()
            .map(|rule| rule.to_record(&self.positives))
            .collect()
    }
}

/// Merge structurally identical rules, unioning their identities. The
/// first occurrence keeps its position.
pub fn deduplicate(rules: Vec<Rule>) -> Vec<Rule> {
    let mut deduped: Vec<Rule> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for rule in rules {
        match seen.entry(rule.canonical().to_string()) {
            Entry::Occupied(entry) => deduped[*entry.get()].merge_identity(&rule),
            Entry::Vacant(entry) => {
                entry.insert(deduped.len());
                deduped.push(rule);
            }
        }
    }
    deduped
}

/// Collapse each (feature, direction) group to its single tightest bound.
/// Thresholds along a decision path are monotone per direction, so the
/// support is unchanged and is not re-evaluated.
pub fn shorten(rules: Vec<Rule>) -> Vec<Rule> {
    rules.into_iter().map(shorten_rule).collect()
}

fn shorten_rule(rule: Rule) -> Rule {
    let mut kept: Vec<Predicate> = Vec::new();
    for predicate in rule.predicates() {
        match kept.iter_mut().find(|existing| {
            existing.feature == predicate.feature
                && existing.op.direction() == predicate.op.direction()
        }) {
            Some(existing) => {
                if predicate.tighter_than(existing) {
                    *existing = predicate.clone();
                }
            }
            None => kept.push(predicate.clone()),
        }
    }
    Rule::new(kept, rule.support().clone(), rule.identity().to_vec())
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
