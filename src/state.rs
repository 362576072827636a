use crate::config::SpotInfo;
use crate::features::SpotId;
use crate::pricing::PricingConfig;
use crate::pricing::competitive::QueueRange;
use crate::pricing::model::PriceQuote;
use crate::regression::RegressionModel;
use crate::reroute::CompetitorSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
pub struct AppState {
    pricing: PricingConfig,
    spots: Vec<SpotInfo>,
    model_path: Option<PathBuf>,
    queue_range: Option<QueueRange>,
    quotes: Vec<PriceQuote>,
    quotes_tx: watch::Sender<Vec<PriceQuote>>,
    snapshot: Option<CompetitorSnapshot>,
    snapshot_tx: watch::Sender<Option<CompetitorSnapshot>>,
    regression: Option<Arc<RegressionModel>>,
    regression_tx: watch::Sender<Option<Arc<RegressionModel>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_settings(PricingConfig::default(), Vec::new())
    }

    pub fn with_settings(pricing: PricingConfig, spots: Vec<SpotInfo>) -> Self {
        let (quotes_tx, _quotes_rx) = watch::channel(Vec::new());
        let (snapshot_tx, _snapshot_rx) = watch::channel(None);
        let (regression_tx, _regression_rx) = watch::channel(None);
        Self {
            pricing,
            spots,
            model_path: None,
            queue_range: None,
            quotes: Vec::new(),
            quotes_tx,
            snapshot: None,
            snapshot_tx,
            regression: None,
            regression_tx,
        }
    }

    pub fn with_model_path(mut self, path: Option<PathBuf>) -> Self {
        self.model_path = path;
        self
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn spots(&self) -> &[SpotInfo] {
        &self.spots
    }

    pub fn spot_code(&self, spot_id: SpotId) -> Option<&str> {
        self.spots
            .iter()
            .find(|s| s.id == spot_id)
            .map(|s| s.code.as_str())
    }

    /// Where retrained models are persisted, if anywhere.
    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    /// Queue range of the most recent batch, used to normalize single predictions.
    pub fn queue_range(&self) -> Option<QueueRange> {
        self.queue_range
    }

    pub fn set_queue_range(&mut self, range: QueueRange) {
        self.queue_range = Some(range);
    }

    pub fn quotes(&self) -> &[PriceQuote] {
        &self.quotes
    }

    pub fn subscribe_quotes(&self) -> watch::Receiver<Vec<PriceQuote>> {
        self.quotes_tx.subscribe()
    }

    pub fn set_quotes(&mut self, quotes: Vec<PriceQuote>) {
        self.quotes = quotes.clone();
        self.quotes_tx.send_replace(quotes);
    }

    pub fn snapshot(&self) -> Option<&CompetitorSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<CompetitorSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn set_snapshot(&mut self, snapshot: CompetitorSnapshot) {
        self.snapshot = Some(snapshot.clone());
        self.snapshot_tx.send_replace(Some(snapshot));
    }

    /// Currently published model. Readers keep their `Arc` across a retrain.
    pub fn regression(&self) -> Option<Arc<RegressionModel>> {
        self.regression.clone()
    }

    pub fn subscribe_regression(&self) -> watch::Receiver<Option<Arc<RegressionModel>>> {
        self.regression_tx.subscribe()
    }

    /// Replace the published model in one step. Watchers are updated even when none
    /// are currently subscribed.
    pub fn set_regression(&mut self, model: Arc<RegressionModel>) {
        self.regression = Some(Arc::clone(&model));
        self.regression_tx.send_replace(Some(model));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::model::ModelKind;
    use crate::regression::{FeatureRow, fit};
    use crate::reroute::SpotSnapshot;
    use time::macros::datetime;

    fn fitted(intercept: f64) -> RegressionModel {
        let samples: Vec<_> = (0..6)
            .map(|i| {
                let x = i as f64;
                (FeatureRow::new(&["x"], vec![x]), intercept + 2.0 * x)
            })
            .collect();
        fit(&samples, 10.0).expect("well-conditioned samples")
    }

    #[test]
    fn set_quotes_updates_state_and_watch() {
        let mut state = AppState::new();
        let receiver = state.subscribe_quotes();
        let quote = PriceQuote {
            spot_id: 1,
            timestamp: datetime!(2016-10-04 08:00 UTC),
            price: 12.5,
            model: ModelKind::Baseline,
        };

        state.set_quotes(vec![quote.clone()]);

        assert_eq!(state.quotes(), &[quote.clone()]);
        assert_eq!(receiver.borrow().as_slice(), &[quote]);
    }

    #[test]
    fn set_snapshot_updates_state_and_watch() {
        let mut state = AppState::new();
        let receiver = state.subscribe_snapshot();
        let snapshot = CompetitorSnapshot {
            timestamp: datetime!(2016-10-04 08:30 UTC),
            spots: vec![SpotSnapshot {
                spot_id: 2,
                latitude: 26.14,
                longitude: 91.73,
                price: 11.0,
                occupancy: 40,
                capacity: 50,
            }],
        };

        state.set_snapshot(snapshot.clone());

        assert_eq!(state.snapshot(), Some(&snapshot));
        assert_eq!(*receiver.borrow(), Some(snapshot));
    }

    #[test]
    fn retrain_swap_leaves_existing_readers_untouched() {
        let mut state = AppState::new();
        let receiver = state.subscribe_regression();

        state.set_regression(Arc::new(fitted(1.0)));
        let held = state.regression().expect("model published");

        state.set_regression(Arc::new(fitted(5.0)));
        let current = state.regression().expect("model published");

        assert!((held.bias() - 1.0).abs() < 1e-9);
        assert!((current.bias() - 5.0).abs() < 1e-9);
        let watched = receiver.borrow().clone().expect("watch updated");
        assert!(Arc::ptr_eq(&watched, &current));
    }

    #[test]
    fn model_path_and_queue_range_start_empty() {
        let mut state = AppState::new().with_model_path(Some(PathBuf::from("config/model.json")));

        assert_eq!(state.model_path(), Some(Path::new("config/model.json")));
        assert_eq!(state.queue_range(), None);

        state.set_queue_range(QueueRange { min: 0.0, max: 8.0 });
        assert_eq!(state.queue_range(), Some(QueueRange { min: 0.0, max: 8.0 }));
    }

    #[test]
    fn spot_code_resolves_catalog_entries() {
        let state = AppState::with_settings(
            PricingConfig::default(),
            vec![SpotInfo {
                id: 13,
                code: "Shopping".to_string(),
                capacity: 1920,
                latitude: 26.15050395,
                longitude: 91.73353109,
            }],
        );

        assert_eq!(state.spot_code(13), Some("Shopping"));
        assert_eq!(state.spot_code(14), None);
    }
}
