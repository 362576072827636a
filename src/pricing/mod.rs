use crate::error::AppError;
use crate::features::FeatureConfig;
use crate::regression::RegressionModel;
use crate::reroute::RerouteConfig;
use serde::Deserialize;
use std::sync::Arc;

pub mod baseline;
pub mod competitive;
pub mod demand;
pub mod model;

use baseline::{BaselineModel, BaselineParams};
use competitive::{CompetitiveModel, MultiplierParams, PriceGuard};
use demand::{DemandModel, DemandParams};
use model::{ModelKind, PricingModel};

/// Immutable pricing constants, loaded once from the `[pricing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub model: ModelKind,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub baseline: BaselineParams,
    #[serde(default)]
    pub demand: DemandParams,
    #[serde(default)]
    pub multiplier: MultiplierParams,
    /// Served-price guard for the competitive model; absent means raw predictions.
    #[serde(default)]
    pub guard: Option<PriceGuard>,
    #[serde(default)]
    pub reroute: RerouteConfig,
}

// Model Factory
pub fn create_model(
    kind: ModelKind,
    config: &PricingConfig,
    regression: Option<Arc<RegressionModel>>,
) -> Result<Box<dyn PricingModel>, AppError> {
    match kind {
        ModelKind::Baseline => Ok(Box::new(BaselineModel::new(config.baseline.clone()))),
        ModelKind::Demand => Ok(Box::new(DemandModel::new(config.demand.clone()))),
        ModelKind::Competitive => {
            let regression = regression.ok_or(AppError::ModelUnavailable)?;
            Ok(Box::new(CompetitiveModel::new(
                regression,
                config.guard.clone(),
            )))
        }
    }
}
