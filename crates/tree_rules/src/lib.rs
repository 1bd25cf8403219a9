//! # Tree Rules
//!
//! A Rust library for explaining binary tree-ensemble classifiers with a
//! short list of human-readable rules.
//!
//! ## Key Features
//!
//! - **Staged rule search**: rules from single trees are conjoined stage
//!   by stage into cross-tree rules until the model's positive
//!   predictions are explained
//! - **Bounded error**: every extracted rule reaches a configurable
//!   precision against the model's own predictions
//! - **Compact output**: a greedy set cover keeps the fewest rules that
//!   still cover every explainable positive
//!
//! ## Example
//!
//! ```rust,ignore
//! use explainers::api::Explainer;
//! use tree_rules::adapter::SourceModel;
//! use tree_rules::explainer::ModelExplainer;
//!
//! let model = SourceModel::from_json(&dump)?;
//! let mut explainer = ModelExplainer::new(model, feature_names)?;
//!
//! // y holds the model's own 0/1 predictions on x
//! let rules = explainer.explain(&x, &y)?;
//! let (fidelity, on_positives, on_negatives) = explainer.fidelity(None, None)?;
//! ```

// Module declarations
pub mod adapter;
pub mod builder;
pub mod eval;
pub mod explainer;
pub mod index;
pub mod rule;
pub mod tree;
