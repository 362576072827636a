//! Pricing cycle: readings in, quotes and a competitor snapshot out.
//!
//! Every entry point copies what it needs out of `AppState`, computes without holding the
//! lock, and publishes the results in one write.

use crate::config::SpotInfo;
use crate::error::{AppError, PricingError};
use crate::features::{self, FeatureConfig, FeatureVector, ParkingReading, SpotId, TrafficLevel};
use crate::pricing::baseline::{baseline_price, utilization_price};
use crate::pricing::competitive::{
    CompetitiveModel, ExtendedFeatures, MarketContext, QueueRange, temp_price,
};
use crate::pricing::model::{ModelKind, PriceQuote, PricingInput};
use crate::pricing::{PricingConfig, create_model};
use crate::regression::{FeatureRow, RegressionModel, fit};
use crate::reroute::{CompetitorSnapshot, SpotSnapshot, haversine_km, recommend};
use crate::state::AppState;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use tracing::{info, warn};

/// How far a reading may sit from its catalog position before it is rejected.
pub const CATALOG_POSITION_TOLERANCE_KM: f64 = 0.05;

/// A reading that passed the catalog check and feature derivation.
#[derive(Debug, Clone, Copy)]
pub struct ValidReading<'a> {
    pub reading: &'a ParkingReading,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedBatch {
    pub quotes: Vec<PriceQuote>,
    /// Readings dropped by the catalog check or feature derivation.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub samples: Vec<(FeatureRow, f64)>,
    pub queue: QueueRange,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotPrediction {
    pub quote: PriceQuote,
    pub code: Option<String>,
    pub traffic: TrafficLevel,
    pub reroute_to: Option<SpotId>,
    pub reroute_code: Option<String>,
}

/// Reject readings whose capacity or position disagrees with the spot catalog.
/// Spots missing from the catalog pass unchecked.
pub fn check_catalog(reading: &ParkingReading, catalog: &[SpotInfo]) -> Result<(), PricingError> {
    let Some(spot) = catalog.iter().find(|s| s.id == reading.spot_id) else {
        return Ok(());
    };
    if spot.capacity != reading.capacity {
        return Err(PricingError::InvalidInput(format!(
            "spot {} reports capacity {}, catalog has {}",
            reading.spot_id, reading.capacity, spot.capacity
        )));
    }
    let offset = haversine_km(spot.latitude, spot.longitude, reading.latitude, reading.longitude);
    if offset > CATALOG_POSITION_TOLERANCE_KM {
        return Err(PricingError::InvalidInput(format!(
            "spot {} reported {offset:.3} km away from its catalog position",
            reading.spot_id
        )));
    }
    Ok(())
}

/// Derive features for every reading, logging and dropping the ones that fail.
pub fn derive_valid<'a>(
    readings: &'a [ParkingReading],
    config: &FeatureConfig,
    catalog: &[SpotInfo],
) -> Vec<ValidReading<'a>> {
    readings
        .iter()
        .filter_map(|reading| {
            match check_catalog(reading, catalog).and_then(|()| features::derive(reading, config)) {
                Ok(features) => Some(ValidReading { reading, features }),
                Err(err) => {
                    warn!(spot_id = reading.spot_id, error = %err, "Skipping invalid reading");
                    None
                }
            }
        })
        .collect()
}

pub fn spot_snapshot(reading: &ParkingReading, price: f64) -> SpotSnapshot {
    SpotSnapshot {
        spot_id: reading.spot_id,
        latitude: reading.latitude,
        longitude: reading.longitude,
        price,
        occupancy: reading.occupancy,
        capacity: reading.capacity,
    }
}

/// Latest state of each spot in the batch, priced with `prices` (same order as `valid`).
pub fn build_snapshot(valid: &[ValidReading<'_>], prices: &[f64]) -> Option<CompetitorSnapshot> {
    let mut latest: BTreeMap<SpotId, (OffsetDateTime, SpotSnapshot)> = BTreeMap::new();
    for (entry, &price) in valid.iter().zip(prices) {
        let reading = entry.reading;
        let newer = latest
            .get(&reading.spot_id)
            .is_none_or(|(seen, _)| reading.timestamp >= *seen);
        if newer {
            latest.insert(
                reading.spot_id,
                (reading.timestamp, spot_snapshot(reading, price)),
            );
        }
    }

    let timestamp = latest.values().map(|(seen, _)| *seen).max()?;
    Some(CompetitorSnapshot {
        timestamp,
        spots: latest.into_values().map(|(_, spot)| spot).collect(),
    })
}

/// Competitive regressors for a batch.
///
/// Readings sharing a timestamp compete with each other; each competitor is priced with
/// the baseline formula. Output order follows `valid`.
pub fn competitive_features(
    valid: &[ValidReading<'_>],
    config: &PricingConfig,
    queue: QueueRange,
) -> Result<Vec<ExtendedFeatures>, PricingError> {
    let prices = valid
        .iter()
        .map(|entry| baseline_price(&entry.features, &config.baseline))
        .collect::<Result<Vec<_>, _>>()?;

    let mut moments: BTreeMap<OffsetDateTime, Vec<usize>> = BTreeMap::new();
    for (index, entry) in valid.iter().enumerate() {
        moments.entry(entry.reading.timestamp).or_default().push(index);
    }

    let mut derived: Vec<Option<ExtendedFeatures>> = vec![None; valid.len()];
    for indices in moments.values() {
        let spots: Vec<SpotSnapshot> = indices
            .iter()
            .map(|&i| spot_snapshot(valid[i].reading, prices[i]))
            .collect();
        let context = MarketContext {
            spots: &spots,
            queue,
            radius_km: config.reroute.radius_km,
            base_price: config.multiplier.base_price,
        };
        for &i in indices {
            derived[i] = Some(ExtendedFeatures::derive(
                valid[i].reading,
                &valid[i].features,
                &context,
            )?);
        }
    }

    Ok(derived.into_iter().flatten().collect())
}

pub fn build_inputs(
    valid: &[ValidReading<'_>],
    config: &PricingConfig,
    queue: QueueRange,
) -> Result<Vec<PricingInput>, PricingError> {
    let extended: Vec<Option<ExtendedFeatures>> = match config.model {
        ModelKind::Competitive => competitive_features(valid, config, queue)?
            .into_iter()
            .map(Some)
            .collect(),
        ModelKind::Baseline | ModelKind::Demand => vec![None; valid.len()],
    };

    Ok(valid
        .iter()
        .zip(extended)
        .map(|(entry, extended)| PricingInput {
            spot_id: entry.reading.spot_id,
            timestamp: entry.reading.timestamp,
            features: entry.features,
            extended,
        })
        .collect())
}

/// Price a batch with the configured model and publish quotes and snapshot.
pub fn price_readings(
    state: &Arc<RwLock<AppState>>,
    readings: &[ParkingReading],
) -> Result<PricedBatch, AppError> {
    let (config, regression, catalog) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (guard.pricing().clone(), guard.regression(), guard.spots().to_vec())
    };

    let valid = derive_valid(readings, &config.features, &catalog);
    let skipped = readings.len() - valid.len();
    let queue = QueueRange::from_readings(valid.iter().map(|entry| entry.reading))
        .ok_or(AppError::EmptyBatch)?;

    let model = create_model(config.model, &config, regression)?;
    let inputs = build_inputs(&valid, &config, queue)?;
    let quotes = model.quote_batch(&inputs)?;

    let prices: Vec<f64> = quotes.iter().map(|quote| quote.price).collect();
    let snapshot = build_snapshot(&valid, &prices);

    {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.set_quotes(quotes.clone());
        guard.set_queue_range(queue);
        if let Some(snapshot) = snapshot {
            guard.set_snapshot(snapshot);
        }
    }

    if skipped > 0 {
        warn!(skipped, priced = quotes.len(), "Priced batch with invalid readings dropped");
    }
    info!(model = %config.model, priced = quotes.len(), "Reading batch priced");

    Ok(PricedBatch { quotes, skipped })
}

/// Regression samples from historical readings: competitive regressors against the
/// multiplier target.
pub fn training_samples(
    readings: &[ParkingReading],
    config: &PricingConfig,
    catalog: &[SpotInfo],
) -> Result<TrainingSet, AppError> {
    let valid = derive_valid(readings, &config.features, catalog);
    let skipped = readings.len() - valid.len();
    let queue = QueueRange::from_readings(valid.iter().map(|entry| entry.reading))
        .ok_or(AppError::EmptyBatch)?;

    let samples = competitive_features(&valid, config, queue)?
        .iter()
        .map(|extended| Ok((extended.to_row(), temp_price(extended, &config.multiplier)?)))
        .collect::<Result<Vec<_>, PricingError>>()?;

    Ok(TrainingSet {
        samples,
        queue,
        skipped,
    })
}

/// Fit a new competitive model on `readings` and publish it.
pub fn retrain(
    state: &Arc<RwLock<AppState>>,
    readings: &[ParkingReading],
) -> Result<Arc<RegressionModel>, AppError> {
    let (config, catalog) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (guard.pricing().clone(), guard.spots().to_vec())
    };

    let training = training_samples(readings, &config, &catalog)?;
    let model = Arc::new(fit(&training.samples, config.multiplier.base_price)?);

    {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.set_regression(Arc::clone(&model));
        guard.set_queue_range(training.queue);
    }

    info!(
        samples = training.samples.len(),
        skipped = training.skipped,
        "Competitive model retrained"
    );
    Ok(model)
}

/// Price one reading with the fitted competitive model and suggest an alternative when
/// the spot is full.
///
/// Competitors enter the regressors at their baseline price, as in training and batch
/// pricing; rerouting compares against the prices actually served.
pub fn predict_spot(
    state: &Arc<RwLock<AppState>>,
    reading: &ParkingReading,
) -> Result<SpotPrediction, AppError> {
    let (config, regression, snapshot, queue_range, catalog) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (
            guard.pricing().clone(),
            guard.regression(),
            guard.snapshot().cloned(),
            guard.queue_range(),
            guard.spots().to_vec(),
        )
    };
    let regression = regression.ok_or(AppError::ModelUnavailable)?;

    check_catalog(reading, &catalog)?;
    let features = features::derive(reading, &config.features)?;

    let served: Vec<SpotSnapshot> = snapshot.map(|snapshot| snapshot.spots).unwrap_or_default();
    let competitors = served
        .iter()
        .map(|spot| {
            let utilization = f64::from(spot.occupancy) / f64::from(spot.capacity);
            Ok(SpotSnapshot {
                price: utilization_price(utilization, &config.baseline)?,
                ..spot.clone()
            })
        })
        .collect::<Result<Vec<_>, PricingError>>()?;

    let queue_length = f64::from(reading.queue_length);
    let queue = queue_range.unwrap_or(QueueRange {
        min: queue_length,
        max: queue_length,
    });
    let context = MarketContext {
        spots: &competitors,
        queue,
        radius_km: config.reroute.radius_km,
        base_price: config.multiplier.base_price,
    };
    let extended = ExtendedFeatures::derive(reading, &features, &context)?;

    let model = CompetitiveModel::new(regression, config.guard.clone());
    let price = model.price(&features, &extended)?;

    let origin = spot_snapshot(reading, price);
    let reroute_to = recommend(&origin, &served, &config.reroute);
    let code_of = |spot_id: SpotId| {
        catalog
            .iter()
            .find(|spot| spot.id == spot_id)
            .map(|spot| spot.code.clone())
    };

    Ok(SpotPrediction {
        quote: PriceQuote {
            spot_id: reading.spot_id,
            timestamp: reading.timestamp,
            price,
            model: ModelKind::Competitive,
        },
        code: code_of(reading.spot_id),
        traffic: features.traffic,
        reroute_to,
        reroute_code: reroute_to.and_then(code_of),
    })
}
