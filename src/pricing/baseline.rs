//! Baseline pricing model.
//!
//! Formula: price = base_price + alpha * utilization

use crate::error::{PricingError, ensure_finite};
use crate::features::FeatureVector;
use crate::pricing::model::{ModelKind, PricingInput, PricingModel};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineParams {
    pub base_price: f64,
    pub alpha: f64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            base_price: 10.0,
            alpha: 5.0,
        }
    }
}

pub fn baseline_price(features: &FeatureVector, params: &BaselineParams) -> Result<f64, PricingError> {
    utilization_price(features.utilization, params)
}

pub fn utilization_price(utilization: f64, params: &BaselineParams) -> Result<f64, PricingError> {
    ensure_finite(params.base_price + params.alpha * utilization, "baseline price")
}

#[derive(Debug)]
pub struct BaselineModel {
    pub params: BaselineParams,
}

impl BaselineModel {
    pub fn new(params: BaselineParams) -> Self {
        Self { params }
    }
}

impl PricingModel for BaselineModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Baseline
    }

    fn price_batch(&self, batch: &[PricingInput]) -> Result<Vec<f64>, PricingError> {
        batch
            .iter()
            .map(|input| baseline_price(&input.features, &self.params))
            .collect()
    }
}
