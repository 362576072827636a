//! Pricing model trait shared by the three formulas.
//!
//! Models are selected via the `[pricing].model` key in `config.toml`. Every model prices a
//! whole batch at once because the demand model normalizes over the batch it is given.

use crate::error::PricingError;
use crate::features::{FeatureVector, SpotId};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Baseline,
    Demand,
    Competitive,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Baseline => "baseline",
            Self::Demand => "demand",
            Self::Competitive => "competitive",
        };
        f.write_str(name)
    }
}

/// Price for one spot at one time. This is the only value handed to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub spot_id: SpotId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub price: f64,
    pub model: ModelKind,
}

/// Input to a pricing model: the spot identity plus its derived features.
///
/// `extended` carries the competitive regressors when the competitive model is used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingInput {
    pub spot_id: SpotId,
    pub timestamp: OffsetDateTime,
    pub features: FeatureVector,
    pub extended: Option<crate::pricing::competitive::ExtendedFeatures>,
}

/// Trait for pricing formulas that turn feature vectors into prices.
///
/// Implement this trait to add new formulas. Implementations must return one price per
/// input, in input order, and must never return a non-finite price.
pub trait PricingModel: Send + Sync + fmt::Debug {
    fn kind(&self) -> ModelKind;

    fn price_batch(&self, batch: &[PricingInput]) -> Result<Vec<f64>, PricingError>;

    /// Price a batch and wrap the results as quotes.
    fn quote_batch(&self, batch: &[PricingInput]) -> Result<Vec<PriceQuote>, PricingError> {
        let prices = self.price_batch(batch)?;
        Ok(batch
            .iter()
            .zip(prices)
            .map(|(input, price)| PriceQuote {
                spot_id: input.spot_id,
                timestamp: input.timestamp,
                price,
                model: self.kind(),
            })
            .collect())
    }
}
