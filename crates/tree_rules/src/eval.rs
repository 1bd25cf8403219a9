//! Predicate evaluation against tabular data.
//!
//! A [`FeatureFrame`] is a per-call snapshot of the evaluation DataFrame:
//! every feature column materialized once as `Option<f64>` values, so that
//! rule supports and tree traversals never go back through polars during
//! the search.

use std::collections::HashMap;

use polars::prelude::*;
use roaring::RoaringBitmap;

use crate::rule::Predicate;

pub struct FeatureFrame {
    columns: HashMap<String, Vec<Option<f64>>>,
    height: usize,
}

impl FeatureFrame {
    /// Snapshot `feature_names` columns of `df`, casting each to `Float64`.
    pub fn from_dataframe(df: &DataFrame, feature_names: &[String]) -> PolarsResult<Self> {
        let mut columns = HashMap::with_capacity(feature_names.len());
        for name in feature_names {
            let casted = df.column(name)?.cast(&DataType::Float64)?;
            let series = casted.as_materialized_series();
            let values: Vec<Option<f64>> = series.f64()?.into_iter().collect();
            columns.insert(name.clone(), values);
        }
        Ok(FeatureFrame {
            columns,
            height: df.height(),
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn column(&self, feature: &str) -> Option<&[Option<f64>]> {
        self.columns.get(feature).map(|v| v.as_slice())
    }

    pub fn value(&self, feature: &str, row: u32) -> Option<f64> {
        self.columns
            .get(feature)
            .and_then(|v| v.get(row as usize).copied())
            .flatten()
    }

    /// All row indices as a bitmap; the support of the empty conjunction.
    pub fn all_rows(&self) -> RoaringBitmap {
        (0..self.height as u32).collect()
    }

    /// Rows satisfying every predicate of the conjunction. A missing value
    /// satisfies no predicate, so rows with nulls in a referenced feature
    /// drop out.
    pub fn rule_support(&self, predicates: &[Predicate]) -> RoaringBitmap {
        let mut support = self.all_rows();
        for predicate in predicates {
            if support.is_empty() {
                break;
            }
            let Some(values) = self.columns.get(&predicate.feature) else {
                return RoaringBitmap::new();
            };
            let mut matching = RoaringBitmap::new();
            for row in &support {
                if let Some(Some(value)) = values.get(row as usize) {
                    if predicate.matches(*value) {
                        matching.insert(row);
                    }
                }
            }
            support = matching;
        }
        support
    }
}
