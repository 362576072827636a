//! Demand-based pricing model.
//!
//! Formula:
//! raw = alpha * utilization + beta * queue_length - gamma * traffic
//!       + delta * special_day + epsilon * vehicle_weight
//! norm = clamp((raw - min) / (max - min + smoothing), 0, 1)
//! price = base_price * (1 + lambda * norm)
//!
//! `min` and `max` are taken over the batch handed to `price_batch`, so a batch of one
//! always prices at `base_price`.

use crate::error::{PricingError, ensure_finite};
use crate::features::FeatureVector;
use crate::pricing::model::{ModelKind, PricingInput, PricingModel};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemandParams {
    pub base_price: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub epsilon: f64,
    pub lambda: f64,
    pub smoothing: f64,
}

impl Default for DemandParams {
    fn default() -> Self {
        Self {
            base_price: 10.0,
            alpha: 3.0,
            beta: 0.3,
            gamma: 0.5,
            delta: 1.0,
            epsilon: 0.5,
            lambda: 0.5,
            smoothing: 1e-6,
        }
    }
}

pub fn raw_demand(features: &FeatureVector, params: &DemandParams) -> Result<f64, PricingError> {
    ensure_finite(
        params.alpha * features.utilization + params.beta * features.queue_length
            - params.gamma * features.traffic_level()
            + params.delta * features.special_day
            + params.epsilon * features.vehicle_weight,
        "raw demand",
    )
}

pub fn demand_prices(features: &[FeatureVector], params: &DemandParams) -> Result<Vec<f64>, PricingError> {
    let raw = features
        .iter()
        .map(|f| raw_demand(f, params))
        .collect::<Result<Vec<_>, _>>()?;

    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min + params.smoothing;

    raw.iter()
        .map(|demand| {
            let norm = ensure_finite((demand - min) / span, "normalized demand")?.clamp(0.0, 1.0);
            ensure_finite(params.base_price * (1.0 + params.lambda * norm), "demand price")
        })
        .collect()
}

#[derive(Debug)]
pub struct DemandModel {
    pub params: DemandParams,
}

impl DemandModel {
    pub fn new(params: DemandParams) -> Self {
        Self { params }
    }
}

impl PricingModel for DemandModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Demand
    }

    fn price_batch(&self, batch: &[PricingInput]) -> Result<Vec<f64>, PricingError> {
        let features: Vec<FeatureVector> = batch.iter().map(|input| input.features).collect();
        demand_prices(&features, &self.params)
    }
}
