//! Joinable-pair discovery for one search stage.
//!
//! For a conjunction of stage-k rules to yield a stage-(k+1) rule, the
//! suffix of some identity chain of the left rule must equal the prefix of
//! some identity chain of the right rule. Indexing every rule under its
//! chains' length-(k-1) prefixes and suffixes finds those pairs without an
//! O(n²) scan over the pool. The index is built fresh for each stage and
//! discarded after use.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::rule::{Chain, Rule, TreeLeaf};

/// Per-stage lookup of rules by identity-chain prefix and suffix.
pub struct JoinIndex {
    prefix_map: HashMap<Chain, Vec<usize>>,
    suffix_map: HashMap<Chain, Vec<usize>>,
}

impl JoinIndex {
    /// Register every rule under the length-(k-1) prefix and suffix of
    /// each of its identity chains.
    pub fn index(rules: &[Rule]) -> Self {
        let mut prefix_map: HashMap<Chain, Vec<usize>> = HashMap::new();
        let mut suffix_map: HashMap<Chain, Vec<usize>> = HashMap::new();

        for (i, rule) in rules.iter().enumerate() {
            let k = rule.stage();
            if k == 0 {
                continue;
            }
            // A rule can reach one key through several chains; register once.
            let mut prefixes: HashSet<&[TreeLeaf]> = HashSet::new();
            let mut suffixes: HashSet<&[TreeLeaf]> = HashSet::new();
            for chain in rule.identity() {
                if chain.len() != k {
                    continue;
                }
                prefixes.insert(&chain[..k - 1]);
                suffixes.insert(&chain[1..]);
            }
            for prefix in prefixes {
                prefix_map.entry(prefix.to_vec()).or_default().push(i);
            }
            for suffix in suffixes {
                suffix_map.entry(suffix.to_vec()).or_default().push(i);
            }
        }

        JoinIndex {
            prefix_map,
            suffix_map,
        }
    }

    /// Indices of rules registered under `key` as a chain prefix.
    pub fn rules_with_prefix(&self, key: &[TreeLeaf]) -> Option<&[usize]> {
        self.prefix_map.get(key).map(|v| v.as_slice())
    }

    /// Indices of rules registered under `key` as a chain suffix.
    pub fn rules_with_suffix(&self, key: &[TreeLeaf]) -> Option<&[usize]> {
        self.suffix_map.get(key).map(|v| v.as_slice())
    }

    /// Candidate join pairs `(left, right)` for the next stage.
    ///
    /// For each key present as both a suffix and a prefix, the suffix side
    /// joins into the prefix side. A surviving pair must still be able to
    /// newly explain a positive (its supports share at least one row of
    /// `positives_to_explain`) and must not be redundant to combine (the
    /// Jaccard similarity of the supports lies in `(0, jaccard_threshold]`).
    /// `(i, j)` and `(j, i)` count as the same candidate join.
    pub fn joinable_pairs(
        rules: &[Rule],
        positives_to_explain: &RoaringBitmap,
        jaccard_threshold: f64,
    ) -> Vec<(usize, usize)> {
        let index = JoinIndex::index(rules);

        let mut keys: Vec<&Chain> = index
            .suffix_map
            .keys()
            .filter(|key| index.prefix_map.contains_key(*key))
            .collect();
        keys.sort();

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for key in keys {
            for &i in &index.suffix_map[key] {
                for &j in &index.prefix_map[key] {
                    if i == j || seen.contains(&(i, j)) || seen.contains(&(j, i)) {
                        continue;
                    }
                    // Stage 1 chains overlap on the empty key, which any two
                    // rules satisfy; only keep pairs whose tree indices can
                    // still interleave increasingly. Rule::join re-checks
                    // per chain.
                    if key.is_empty() && !tree_ranges_interleave(&rules[i], &rules[j]) {
                        continue;
                    }
                    seen.insert((i, j));
                    pairs.push((i, j));
                }
            }
        }

        let mut accepted: Vec<(usize, usize)> = pairs
            .into_par_iter()
            .filter(|&(i, j)| {
                accept_pair(
                    rules[i].support(),
                    rules[j].support(),
                    positives_to_explain,
                    jaccard_threshold,
                )
            })
            .collect();
        accepted.sort_unstable();
        accepted
    }
}

/// Some chain of `left` must carry a smaller tree index than some chain of
/// `right` for a stage-2 join to exist.
fn tree_ranges_interleave(left: &Rule, right: &Rule) -> bool {
    let min_left = left.identity().iter().map(|chain| chain[0].tree).min();
    let max_right = right.identity().iter().map(|chain| chain[0].tree).max();
    match (min_left, max_right) {
        (Some(lo), Some(hi)) => lo < hi,
        _ => false,
    }
}

fn accept_pair(
    left: &RoaringBitmap,
    right: &RoaringBitmap,
    positives_to_explain: &RoaringBitmap,
    jaccard_threshold: f64,
) -> bool {
    let intersection = left.intersection_len(right);
    if intersection == 0 {
        return false;
    }
    let shared = left.clone() & right;
    if shared.is_disjoint(positives_to_explain) {
        return false;
    }
    let union = left.len() + right.len() - intersection;
    let jaccard = intersection as f64 / union as f64;
    jaccard > 0.0 && jaccard <= jaccard_threshold
}
