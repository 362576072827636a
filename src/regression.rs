//! Least squares fitting of price weights.
//!
//! `fit` builds a design matrix with a leading bias column and solves it through an SVD
//! instead of inverting `XᵀX`. The resulting `RegressionModel` is immutable: retraining
//! produces a new model which callers publish as a whole.
//!
//! # Persisted format
//!
//! ```json
//! {
//!   "weights": [10.0, 3.5, 2.5, 1.0, 1.0, 0.5, 1.0, 0.5],
//!   "base_price": 10.0,
//!   "feature_order": ["utilization", "price_pressure", "queue_norm", "vehicle_scaled",
//!                     "traffic_scaled", "competitiveness_scaled", "special_day"]
//! }
//! ```

use crate::error::{PricingError, ensure_finite};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Relative singular value cutoff below which a design matrix counts as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Ordered, named regressor values for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub columns: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureRow {
    pub fn new(columns: &[&str], values: Vec<f64>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelRecord")]
pub struct RegressionModel {
    weights: Vec<f64>,
    base_price: f64,
    feature_order: Vec<String>,
}

/// Unvalidated form of the persisted record.
#[derive(Debug, Deserialize)]
struct ModelRecord {
    weights: Vec<f64>,
    base_price: f64,
    feature_order: Vec<String>,
}

impl TryFrom<ModelRecord> for RegressionModel {
    type Error = ModelFileError;

    fn try_from(record: ModelRecord) -> Result<Self, Self::Error> {
        let model = Self {
            weights: record.weights,
            base_price: record.base_price,
            feature_order: record.feature_order,
        };
        model.validate()?;
        Ok(model)
    }
}

impl RegressionModel {
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.weights.first().copied().unwrap_or(0.0)
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    /// Predict a price as `w · [1, values...]`.
    pub fn predict(&self, row: &FeatureRow) -> Result<f64, PricingError> {
        self.check_schema(row)?;
        let Some((bias, slopes)) = self.weights.split_first() else {
            return Err(PricingError::InvalidInput("model has no weights".to_string()));
        };
        let price = bias
            + slopes
                .iter()
                .zip(&row.values)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        ensure_finite(price, "regression prediction")
    }

    fn check_schema(&self, row: &FeatureRow) -> Result<(), PricingError> {
        let same_order = self.feature_order == row.columns;
        if !same_order || row.values.len() != self.feature_order.len() {
            return Err(PricingError::SchemaMismatch {
                expected: self.feature_order.clone(),
                actual: row.columns.clone(),
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn decode(json: &str) -> Result<Self, ModelFileError> {
        let record: ModelRecord = serde_json::from_str(json)?;
        Self::try_from(record)
    }

    fn validate(&self) -> Result<(), ModelFileError> {
        if self.weights.len() != self.feature_order.len() + 1 {
            return Err(ModelFileError::Invalid(format!(
                "expected {} weights for {} features, got {}",
                self.feature_order.len() + 1,
                self.feature_order.len(),
                self.weights.len()
            )));
        }
        if !self.weights.iter().all(|w| w.is_finite()) || !self.base_price.is_finite() {
            return Err(ModelFileError::Invalid(
                "weights and base price must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fit `price ≈ w0 + w · x` over historical samples.
pub fn fit(samples: &[(FeatureRow, f64)], base_price: f64) -> Result<RegressionModel, PricingError> {
    let Some((first, _)) = samples.first() else {
        return Err(PricingError::SingularMatrix {
            rows: 0,
            cols: 0,
            rank: 0,
        });
    };
    let feature_order = first.columns.clone();
    let rows = samples.len();
    let cols = feature_order.len() + 1;

    for (row, target) in samples {
        if row.columns != feature_order || row.values.len() != feature_order.len() {
            return Err(PricingError::SchemaMismatch {
                expected: feature_order,
                actual: row.columns.clone(),
            });
        }
        ensure_finite(*target, "regression target")?;
        for value in &row.values {
            ensure_finite(*value, "regression feature")?;
        }
    }

    if rows < cols {
        return Err(PricingError::SingularMatrix { rows, cols, rank: rows });
    }

    let design = DMatrix::from_fn(rows, cols, |r, c| {
        if c == 0 { 1.0 } else { samples[r].0.values[c - 1] }
    });
    let targets = DVector::from_iterator(rows, samples.iter().map(|(_, y)| *y));

    let svd = design.svd(true, true);
    let largest = svd.singular_values.max();
    let cutoff = largest * RANK_TOLERANCE;
    let rank = svd.rank(cutoff);
    if rank < cols || largest <= 0.0 {
        return Err(PricingError::SingularMatrix { rows, cols, rank });
    }

    let solution = svd
        .solve(&targets, cutoff)
        .map_err(|_| PricingError::SingularMatrix { rows, cols, rank })?;
    let weights = solution
        .iter()
        .map(|w| ensure_finite(*w, "regression weight"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RegressionModel {
        weights,
        base_price,
        feature_order,
    })
}

#[derive(Debug, Error)]
pub enum ModelFileError {
    #[error("failed to read model file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
}

pub fn load_model_from_path(path: impl AsRef<Path>) -> Result<RegressionModel, ModelFileError> {
    let contents = std::fs::read_to_string(path)?;
    RegressionModel::decode(&contents)
}

pub fn save_model_to_path(model: &RegressionModel, path: impl AsRef<Path>) -> Result<(), ModelFileError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, model.encode()?)?;
    Ok(())
}
