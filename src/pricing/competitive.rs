//! Competitive pricing model.
//!
//! Two stages share the same regressors:
//!
//! - training targets come from the multiplier formula,
//!   `temp_price = base_price * (1 + Σ weight_i * regressor_i)`;
//! - served prices come from the fitted `RegressionModel`, optionally passed through a
//!   `PriceGuard` (peak override, clamp, rounding to cents).
//!
//! The regressors need context the single reading does not carry: the queue range of the
//! batch and the prices and occupancy of nearby competitors at the same moment.

use crate::error::{PricingError, ensure_finite};
use crate::features::{FeatureVector, ParkingReading};
use crate::pricing::model::{ModelKind, PricingInput, PricingModel};
use crate::regression::{FeatureRow, RegressionModel};
use crate::reroute::{SpotSnapshot, neighbours};
use serde::Deserialize;
use std::sync::Arc;

pub const COMPETITIVE_COLUMNS: [&str; 7] = [
    "utilization",
    "price_pressure",
    "queue_norm",
    "vehicle_scaled",
    "traffic_scaled",
    "competitiveness_scaled",
    "special_day",
];

/// Competitiveness reported when no competitor is within reach.
const UNCONTESTED_COMPETITIVENESS: f64 = 2.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiplierParams {
    pub base_price: f64,
    pub utilization: f64,
    pub price_pressure: f64,
    pub queue: f64,
    pub vehicle: f64,
    pub traffic: f64,
    pub competitiveness: f64,
    pub special_day: f64,
}

impl Default for MultiplierParams {
    fn default() -> Self {
        Self {
            base_price: 10.0,
            utilization: 0.35,
            price_pressure: 0.25,
            queue: 0.10,
            vehicle: 0.10,
            traffic: 0.05,
            competitiveness: 0.10,
            special_day: 0.05,
        }
    }
}

impl MultiplierParams {
    fn column_weights(&self) -> [f64; 7] {
        [
            self.utilization,
            self.price_pressure,
            self.queue,
            self.vehicle,
            self.traffic,
            self.competitiveness,
            self.special_day,
        ]
    }
}

/// Served-price guard applied around the fitted model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceGuard {
    pub min_price: f64,
    pub max_price: f64,
    /// Queue length at which the peak override may kick in.
    pub peak_queue_length: f64,
    /// Queue pressure at which the peak override may kick in.
    pub peak_queue_pressure: f64,
    pub peak_multiplier: f64,
}

impl Default for PriceGuard {
    fn default() -> Self {
        Self {
            min_price: 5.0,
            max_price: 20.0,
            peak_queue_length: 10.0,
            peak_queue_pressure: 1.0,
            peak_multiplier: 2.0,
        }
    }
}

impl PriceGuard {
    /// Check the bounds once at load time so `apply` never sees an inverted range.
    pub fn validate(&self) -> Result<(), PricingError> {
        let values = [
            self.min_price,
            self.max_price,
            self.peak_queue_length,
            self.peak_queue_pressure,
            self.peak_multiplier,
        ];
        if !values.iter().all(|v| v.is_finite()) {
            return Err(PricingError::InvalidInput(
                "price guard values must be finite".to_string(),
            ));
        }
        if self.min_price > self.max_price {
            return Err(PricingError::InvalidInput(format!(
                "price guard min_price {} exceeds max_price {}",
                self.min_price, self.max_price
            )));
        }
        if self.peak_multiplier <= 0.0 {
            return Err(PricingError::InvalidInput(format!(
                "price guard peak_multiplier must be positive, got {}",
                self.peak_multiplier
            )));
        }
        Ok(())
    }

    pub fn apply(&self, predicted: f64, features: &FeatureVector, base_price: f64) -> f64 {
        let price = if features.queue_length >= self.peak_queue_length
            && features.queue_pressure >= self.peak_queue_pressure
        {
            base_price * self.peak_multiplier
        } else {
            predicted
        };
        (price.max(self.min_price).min(self.max_price) * 100.0).round() / 100.0
    }
}

/// Queue length range used to min-max normalize queues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueRange {
    pub min: f64,
    pub max: f64,
}

impl QueueRange {
    pub fn from_readings<'a>(readings: impl IntoIterator<Item = &'a ParkingReading>) -> Option<Self> {
        let mut queues = readings.into_iter().map(|r| f64::from(r.queue_length));
        let first = queues.next()?;
        let (min, max) = queues.fold((first, first), |(lo, hi), q| (lo.min(q), hi.max(q)));
        Some(Self { min, max })
    }

    /// Normalized queue length in [0, 1]; a flat range divides by one.
    pub fn normalize(&self, queue_length: f64) -> f64 {
        let span = self.max - self.min;
        let denom = if span.abs() < f64::EPSILON { 1.0 } else { span };
        ((queue_length - self.min) / denom).clamp(0.0, 1.0)
    }
}

/// Batch-level context for deriving the competitive regressors.
#[derive(Debug, Clone, Copy)]
pub struct MarketContext<'a> {
    /// Spots observed at the same moment, with their current prices.
    pub spots: &'a [SpotSnapshot],
    pub queue: QueueRange,
    pub radius_km: Option<f64>,
    pub base_price: f64,
}

/// Regressors of the competitive model, in raw units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedFeatures {
    pub utilization: f64,
    /// Mean relative premium of nearby competitors over the base price, in [0, 1].
    pub price_pressure: f64,
    pub queue_norm: f64,
    pub vehicle_weight: f64,
    pub traffic: f64,
    /// Twice the share of nearby competitors that are full, in [0, 2].
    pub competitiveness: f64,
    pub special_day: f64,
}

impl ExtendedFeatures {
    pub fn derive(
        reading: &ParkingReading,
        features: &FeatureVector,
        context: &MarketContext<'_>,
    ) -> Result<Self, PricingError> {
        let nearby: Vec<&SpotSnapshot> = neighbours(
            reading.spot_id,
            reading.latitude,
            reading.longitude,
            context.spots,
            context.radius_km,
        )
        .collect();

        let (price_pressure, competitiveness) = if nearby.is_empty() {
            (0.0, UNCONTESTED_COMPETITIVENESS)
        } else {
            let count = nearby.len() as f64;
            let premium = nearby
                .iter()
                .map(|s| (s.price / context.base_price - 1.0).clamp(0.0, 1.0))
                .sum::<f64>()
                / count;
            let full = nearby.iter().filter(|s| !s.has_free_space()).count() as f64;
            (premium, 2.0 * full / count)
        };

        Ok(Self {
            utilization: features.utilization,
            price_pressure: ensure_finite(price_pressure, "price pressure")?,
            queue_norm: ensure_finite(context.queue.normalize(features.queue_length), "queue norm")?,
            vehicle_weight: features.vehicle_weight,
            traffic: features.traffic_level(),
            competitiveness,
            special_day: features.special_day,
        })
    }

    /// Scaled regressor values in `COMPETITIVE_COLUMNS` order.
    pub fn values(&self) -> [f64; 7] {
        [
            self.utilization,
            self.price_pressure,
            self.queue_norm,
            self.vehicle_weight / 3.0,
            self.traffic / 2.0,
            self.competitiveness / 2.0,
            self.special_day,
        ]
    }

    pub fn to_row(&self) -> FeatureRow {
        FeatureRow::new(&COMPETITIVE_COLUMNS, self.values().to_vec())
    }
}

pub fn multiplier(features: &ExtendedFeatures, params: &MultiplierParams) -> Result<f64, PricingError> {
    let weighted = params
        .column_weights()
        .iter()
        .zip(features.values())
        .map(|(w, x)| w * x)
        .sum::<f64>();
    ensure_finite(1.0 + weighted, "price multiplier")
}

/// Regression target for one sample.
pub fn temp_price(features: &ExtendedFeatures, params: &MultiplierParams) -> Result<f64, PricingError> {
    ensure_finite(params.base_price * multiplier(features, params)?, "temporary price")
}

/// Competitive model backed by a fitted regression.
#[derive(Debug)]
pub struct CompetitiveModel {
    pub regression: Arc<RegressionModel>,
    pub guard: Option<PriceGuard>,
}

impl CompetitiveModel {
    pub fn new(regression: Arc<RegressionModel>, guard: Option<PriceGuard>) -> Self {
        Self { regression, guard }
    }

    pub fn price(&self, features: &FeatureVector, extended: &ExtendedFeatures) -> Result<f64, PricingError> {
        let predicted = self.regression.predict(&extended.to_row())?;
        let price = match &self.guard {
            Some(guard) => guard.apply(predicted, features, self.regression.base_price()),
            None => predicted,
        };
        ensure_finite(price, "competitive price")
    }
}

impl PricingModel for CompetitiveModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Competitive
    }

    fn price_batch(&self, batch: &[PricingInput]) -> Result<Vec<f64>, PricingError> {
        batch
            .iter()
            .map(|input| {
                let extended = input.extended.ok_or_else(|| {
                    PricingError::InvalidInput(format!(
                        "spot {} is missing competitive features",
                        input.spot_id
                    ))
                })?;
                self.price(&input.features, &extended)
            })
            .collect()
    }
}
