use core::fmt;
use std::cmp::Ordering;

use itertools::Itertools;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

/// Comparison operator of a threshold predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Whether a predicate bounds its feature from above or from below.
/// Predicates on the same feature and direction are combinable: the
/// tighter bound subsumes the looser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upper,
    Lower,
}

impl Op {
    pub fn direction(&self) -> Direction {
        match self {
            Op::Lt | Op::Le => Direction::Upper,
            Op::Gt | Op::Ge => Direction::Lower,
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Op::Lt | Op::Gt)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Op::Lt => value < threshold,
            Op::Le => value <= threshold,
            Op::Gt => value > threshold,
            Op::Ge => value >= threshold,
        }
    }
}

/// A single threshold condition on one feature, e.g. `age <= 38.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub feature: String,
    pub op: Op,
    pub threshold: f64,
}

impl Predicate {
    pub fn new(feature: impl Into<String>, op: Op, threshold: f64) -> Self {
        Predicate {
            feature: feature.into(),
            op,
            threshold,
        }
    }

    pub fn matches(&self, value: f64) -> bool {
        self.op.matches(value, self.threshold)
    }

    /// Total order used for canonical rendering: feature, then operator,
    /// then threshold under `f64::total_cmp`.
    pub fn canonical_cmp(&self, other: &Predicate) -> Ordering {
        self.feature
            .cmp(&other.feature)
            .then(self.op.cmp(&other.op))
            .then(self.threshold.total_cmp(&other.threshold))
    }

    /// True when `self` implies `other` among predicates sharing a feature
    /// and direction: a smaller upper bound (or larger lower bound), with a
    /// strict operator winning over a non-strict one at an equal threshold.
    pub fn tighter_than(&self, other: &Predicate) -> bool {
        debug_assert_eq!(self.feature, other.feature);
        debug_assert_eq!(self.op.direction(), other.op.direction());
        match self.threshold.total_cmp(&other.threshold) {
            Ordering::Equal => self.op.is_strict() && !other.op.is_strict(),
            Ordering::Less => self.op.direction() == Direction::Upper,
            Ordering::Greater => self.op.direction() == Direction::Lower,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.feature, self.op.symbol(), self.threshold)
    }
}

/// One source leaf of a rule: the tree it came from and the leaf's node
/// index within that tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeLeaf {
    pub tree: usize,
    pub leaf: usize,
}

impl TreeLeaf {
    pub fn new(tree: usize, leaf: usize) -> Self {
        TreeLeaf { tree, leaf }
    }
}

/// A provenance chain: the ordered tree-leaf combination a rule was built
/// from. Tree indices are strictly increasing within a chain; the chain
/// length is the rule's stage.
pub type Chain = Vec<TreeLeaf>;

/// Serializable summary of an extracted rule: its canonical conjunction
/// string plus support size and precision as metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule: String,
    pub support_size: u64,
    pub precision: f64,
}

/// A conjunction of threshold predicates with the set of data rows it
/// covers and the tree-leaf combinations that can produce it.
///
/// Rules are values: `join` builds a new rule and never mutates its
/// operands, and `predicates` and `support` stay consistent for the
/// rule's whole lifetime. Only the identity grows, when structurally
/// identical rules are merged.
#[derive(Debug, Clone)]
pub struct Rule {
    predicates: Vec<Predicate>,
    support: RoaringBitmap,
    identity: Vec<Chain>,
    key: String,
}

impl Rule {
    /// Build a rule, canonicalizing its parts: predicates are stably
    /// sorted with exact duplicates collapsed, identity chains sorted and
    /// deduplicated. The canonical string is fixed here once.
    pub fn new(mut predicates: Vec<Predicate>, support: RoaringBitmap, identity: Vec<Chain>) -> Self {
        predicates.sort_by(|a, b| a.canonical_cmp(b));
        predicates.dedup_by(|a, b| a.canonical_cmp(b) == Ordering::Equal);

        let identity: Vec<Chain> = identity.into_iter().sorted().dedup().collect();

        debug_assert!(
            identity
                .iter()
                .all(|chain| chain.windows(2).all(|w| w[0].tree < w[1].tree)),
            "chains carry strictly increasing tree indices"
        );

        let key = predicates.iter().map(|p| p.to_string()).join(" & ");
        Rule {
            predicates,
            support,
            identity,
            key,
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn support(&self) -> &RoaringBitmap {
        &self.support
    }

    pub fn identity(&self) -> &[Chain] {
        &self.identity
    }

    /// Number of distinct source trees conjoined into this rule. Candidate
    /// pools are stage-uniform, so any chain's length is the stage; merged
    /// solution rules may mix derivation lengths and are never joined.
    pub fn stage(&self) -> usize {
        self.identity.first().map(|chain| chain.len()).unwrap_or(0)
    }

    /// Canonical conjunction string, the rule's equality and map key.
    pub fn canonical(&self) -> &str {
        &self.key
    }

    pub fn num_predicates(&self) -> usize {
        self.predicates.len()
    }

    /// Fraction of the support predicted positive by the model. A rule
    /// with empty support has no measurable precision and scores 0.
    pub fn precision(&self, positives: &RoaringBitmap) -> f64 {
        if self.support.is_empty() {
            return 0.0;
        }
        self.support.intersection_len(positives) as f64 / self.support.len() as f64
    }

    /// Whether the rule qualifies as an explanation of the positive class.
    /// Empty-support rules never qualify.
    pub fn is_solution(&self, positives: &RoaringBitmap, min_precision: f64) -> bool {
        !self.support.is_empty() && self.precision(positives) >= min_precision
    }

    /// Conjoin two same-stage rules into a rule one stage higher.
    ///
    /// A chain `p` of `self` continues into a chain `q` of `other` when the
    /// last `k - 1` elements of `p` equal the first `k - 1` of `q`; the
    /// joined chain is `p` extended by `q`'s last element. At stage 1 the
    /// overlap is empty and matches vacuously, so the continuation instead
    /// requires strictly increasing tree indices, which also rejects
    /// combining two leaves of the same tree. Every matching chain pair
    /// contributes to the joined identity, not just the first found.
    ///
    /// Returns `None` when no chain pair matches; callers treat this as a
    /// normal branch.
    pub fn join(&self, other: &Rule) -> Option<Rule> {
        let k = self.stage();
        if k == 0 || k != other.stage() {
            return None;
        }

        let mut chains: Vec<Chain> = Vec::new();
        for p in &self.identity {
            for q in &other.identity {
                if p.len() != k || q.len() != k {
                    continue;
                }
                let continues = if k == 1 {
                    p[0].tree < q[0].tree
                } else {
                    p[1..] == q[..k - 1]
                };
                if continues {
                    let mut chain = p.clone();
                    chain.push(q[k - 1]);
                    chains.push(chain);
                }
            }
        }
        if chains.is_empty() {
            return None;
        }

        let mut predicates = self.predicates.clone();
        predicates.extend(other.predicates.iter().cloned());
        let support = self.support.clone() & &other.support;
        Some(Rule::new(predicates, support, chains))
    }

    /// Absorb the identity of a structurally identical rule.
    pub(crate) fn merge_identity(&mut self, other: &Rule) {
        debug_assert_eq!(self.key, other.key);
        let merged = self
            .identity
            .iter()
            .cloned()
            .chain(other.identity.iter().cloned())
            .sorted()
            .dedup()
            .collect();
        self.identity = merged;
    }

    pub fn to_record(&self, positives: &RoaringBitmap) -> RuleRecord {
        RuleRecord {
            rule: self.key.clone(),
            support_size: self.support.len(),
            precision: self.precision(positives),
        }
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Rule {}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
