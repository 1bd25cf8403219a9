use polars::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Numerical error: {0}")]
    Numerical(String),
    // add more as needed
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("No rules extracted yet, call explain() first")]
    NotExplained,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Numerical error: {0}")]
    Numerical(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub trait Explainer: Sized {
    fn explain(&mut self, x: &DataFrame, y: &[u8]) -> Result<Vec<String>, ExplainError> {
        self._explain_impl(x, y)
    }

    fn _explain_impl(&mut self, _x: &DataFrame, _y: &[u8]) -> Result<Vec<String>, ExplainError> {
        // Default implementation can be overridden by specific explainers
        Err(ExplainError::InvalidInput(
            "Default explain implementation not provided".to_string(),
        ))
    }

    fn predict(&self, x: &DataFrame) -> Result<Vec<u8>, PredictError> {
        self._predict_impl(x)
    }

    fn _predict_impl(&self, _x: &DataFrame) -> Result<Vec<u8>, PredictError> {
        // Default implementation can be overridden by specific explainers
        Err(PredictError::NotExplained)
    }

    /// Fidelity of the extracted explanation on `(x, y)`, or on the data the
    /// explanation was extracted from when both are `None`.
    ///
    /// Returns `(overall, positives, negatives)` ratios in `[0, 1]`.
    fn fidelity(
        &self,
        x: Option<&DataFrame>,
        y: Option<&[u8]>,
    ) -> Result<(f64, f64, f64), PredictError> {
        self._fidelity_impl(x, y)
    }

    fn _fidelity_impl(
        &self,
        _x: Option<&DataFrame>,
        _y: Option<&[u8]>,
    ) -> Result<(f64, f64, f64), PredictError> {
        Err(PredictError::NotExplained)
    }
}
