use crate::api::responses::{
    ErrorCode, ErrorResponse, HealthStatus, HealthSuccessResponse, PredictSuccessResponse,
    QuoteResponse, QuotesSuccessResponse, RerouteResponse, RetrainSuccessResponse,
};
use crate::error::AppError;
use crate::features::ParkingReading;
use crate::pipeline;
use crate::pricing::model::{ModelKind, PriceQuote};
use crate::regression::save_model_to_path;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success(T),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_health_response(state, OffsetDateTime::now_utc())
}

pub async fn get_quotes(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_quotes_response(state, OffsetDateTime::now_utc())
}

// Bodies that fail to deserialize, such as a negative queue length, get the same error
// body as readings that fail derivation.

pub async fn post_readings(
    State(state): State<Arc<RwLock<AppState>>>,
    payload: Result<Json<Vec<ParkingReading>>, JsonRejection>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();
    match payload {
        Ok(Json(readings)) => build_readings_response(state, &readings, now),
        Err(rejection) => rejected_body("/api/readings", &rejection, now),
    }
}

pub async fn post_predict(
    State(state): State<Arc<RwLock<AppState>>>,
    payload: Result<Json<ParkingReading>, JsonRejection>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();
    match payload {
        Ok(Json(reading)) => build_predict_response(state, &reading, now),
        Err(rejection) => rejected_body("/api/predict", &rejection, now),
    }
}

pub async fn post_retrain(
    State(state): State<Arc<RwLock<AppState>>>,
    payload: Result<Json<Vec<ParkingReading>>, JsonRejection>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();
    match payload {
        Ok(Json(readings)) => build_retrain_response(state, &readings, now),
        Err(rejection) => rejected_body("/api/model/retrain", &rejection, now),
    }
}

fn build_health_response(
    state: Arc<RwLock<AppState>>,
    now: OffsetDateTime,
) -> ApiResponse<HealthSuccessResponse> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/health", "state lock poisoned while reading model");
        }
    };
    let pricing_model = guard.pricing().model;
    let model_loaded = guard.regression().is_some();
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };

    let status = if pricing_model == ModelKind::Competitive && !model_loaded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    ApiResponse::Success(HealthSuccessResponse {
        status,
        pricing_model,
        model_loaded,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp,
    })
}

fn build_quotes_response(
    state: Arc<RwLock<AppState>>,
    now: OffsetDateTime,
) -> ApiResponse<QuotesSuccessResponse> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/quotes", "state lock poisoned while reading quotes");
        }
    };
    if guard.quotes().is_empty() {
        drop(guard);
        return no_data_response(now);
    }
    let quotes = map_quotes(&guard, guard.quotes());
    drop(guard);

    match (quotes, format_timestamp(now)) {
        (Ok(quotes), Ok(timestamp)) => ApiResponse::Success(QuotesSuccessResponse {
            quotes,
            skipped: None,
            timestamp,
        }),
        _ => internal_error("/api/quotes", "timestamp formatting failure"),
    }
}

fn build_readings_response(
    state: Arc<RwLock<AppState>>,
    readings: &[ParkingReading],
    now: OffsetDateTime,
) -> ApiResponse<QuotesSuccessResponse> {
    let batch = match pipeline::price_readings(&state, readings) {
        Ok(batch) => batch,
        Err(err) => return error_response("/api/readings", &err, now),
    };

    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/readings", "state lock poisoned while reading spots");
        }
    };
    let quotes = map_quotes(&guard, &batch.quotes);
    drop(guard);

    match (quotes, format_timestamp(now)) {
        (Ok(quotes), Ok(timestamp)) => ApiResponse::Success(QuotesSuccessResponse {
            quotes,
            skipped: Some(batch.skipped),
            timestamp,
        }),
        _ => internal_error("/api/readings", "timestamp formatting failure"),
    }
}

fn build_predict_response(
    state: Arc<RwLock<AppState>>,
    reading: &ParkingReading,
    now: OffsetDateTime,
) -> ApiResponse<PredictSuccessResponse> {
    let prediction = match pipeline::predict_spot(&state, reading) {
        Ok(prediction) => prediction,
        Err(err) => return error_response("/api/predict", &err, now),
    };

    let timestamp = match format_timestamp(prediction.quote.timestamp) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/predict", "timestamp formatting failure"),
    };

    ApiResponse::Success(PredictSuccessResponse {
        spot_id: prediction.quote.spot_id,
        code: prediction.code,
        price: prediction.quote.price,
        traffic: prediction.traffic.label().to_string(),
        reroute: prediction.reroute_to.map(|spot_id| RerouteResponse {
            spot_id,
            code: prediction.reroute_code,
        }),
        timestamp,
    })
}

fn build_retrain_response(
    state: Arc<RwLock<AppState>>,
    readings: &[ParkingReading],
    now: OffsetDateTime,
) -> ApiResponse<RetrainSuccessResponse> {
    let model = match pipeline::retrain(&state, readings) {
        Ok(model) => model,
        Err(err) => return error_response("/api/model/retrain", &err, now),
    };

    let model_path = match state.read() {
        Ok(guard) => guard.model_path().map(|path| path.to_path_buf()),
        Err(_) => {
            return internal_error("/api/model/retrain", "state lock poisoned while reading model path");
        }
    };

    let persisted = match model_path {
        Some(path) => match save_model_to_path(&model, &path) {
            Ok(()) => {
                info!(path = %path.display(), "Retrained model saved");
                true
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to save retrained model");
                false
            }
        },
        None => false,
    };

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/model/retrain", "timestamp formatting failure"),
    };

    ApiResponse::Success(RetrainSuccessResponse {
        feature_order: model.feature_order().to_vec(),
        weights: model.weights().to_vec(),
        base_price: model.base_price(),
        persisted,
        timestamp,
    })
}

fn map_quotes(state: &AppState, quotes: &[PriceQuote]) -> Result<Vec<QuoteResponse>, TimestampError> {
    quotes
        .iter()
        .map(|quote| {
            Ok(QuoteResponse {
                spot_id: quote.spot_id,
                code: state.spot_code(quote.spot_id).map(str::to_string),
                price: quote.price,
                model: quote.model,
                timestamp: format_timestamp(quote.timestamp)?,
            })
        })
        .collect()
}

fn no_data_response<T>(now: OffsetDateTime) -> ApiResponse<T> {
    match format_timestamp(now) {
        Ok(formatted) => ApiResponse::Error {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: ErrorResponse {
                error_code: ErrorCode::NoData,
                error_message: "No price quotes available".to_string(),
                timestamp: formatted,
            },
        },
        Err(_) => internal_error("/api/quotes", "timestamp formatting failure"),
    }
}

fn error_response<T>(route: &str, err: &AppError, now: OffsetDateTime) -> ApiResponse<T> {
    let (status, error_code) = match err {
        AppError::Pricing(_) | AppError::EmptyBatch => {
            (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::InvalidReadings)
        }
        AppError::ModelUnavailable => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::ModelUnavailable),
        AppError::StateLock => return internal_error(route, "state lock poisoned"),
    };
    warn!(route, error = %err, "Request rejected");

    match format_timestamp(now) {
        Ok(formatted) => ApiResponse::Error {
            status,
            body: ErrorResponse {
                error_code,
                error_message: err.to_string(),
                timestamp: formatted,
            },
        },
        Err(_) => internal_error(route, "timestamp formatting failure"),
    }
}

fn rejected_body<T>(route: &str, rejection: &JsonRejection, now: OffsetDateTime) -> ApiResponse<T> {
    warn!(route, error = %rejection.body_text(), "Request body rejected");
    match format_timestamp(now) {
        Ok(formatted) => ApiResponse::Error {
            status: rejection.status(),
            body: ErrorResponse {
                error_code: ErrorCode::InvalidReadings,
                error_message: rejection.body_text(),
                timestamp: formatted,
            },
        },
        Err(_) => internal_error(route, "timestamp formatting failure"),
    }
}

fn internal_error<T>(route: &str, message: &str) -> ApiResponse<T> {
    error!(route, message = message, "Internal error while handling request");
    let formatted = format_timestamp(OffsetDateTime::now_utc()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, TimestampError> {
    timestamp.format(&Rfc3339).map_err(TimestampError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpotInfo;
    use crate::features::tests::reading;
    use crate::pipeline::tests::history;
    use crate::pricing::PricingConfig;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-01-11 12:30 UTC);

    fn state_with(model: ModelKind) -> Arc<RwLock<AppState>> {
        let pricing = PricingConfig {
            model,
            ..PricingConfig::default()
        };
        let spots = vec![SpotInfo {
            id: 1,
            code: "BHMBCCMKT01".to_string(),
            capacity: 50,
            latitude: 26.144536,
            longitude: 91.736172,
        }];
        Arc::new(RwLock::new(AppState::with_settings(pricing, spots)))
    }

    fn poisoned() -> Arc<RwLock<AppState>> {
        let state = Arc::new(RwLock::new(AppState::new()));
        let state_for_thread = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
        state
    }

    #[test]
    fn quotes_handler_returns_no_data_when_missing() {
        let response = build_quotes_response(state_with(ModelKind::Baseline), NOW);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::NoData);
                assert_eq!(body.timestamp, "2026-01-11T12:30:00Z");
            }
            ApiResponse::Success(_) => panic!("expected no data error response"),
        }
    }

    #[test]
    fn readings_then_quotes_return_priced_spots() {
        let state = state_with(ModelKind::Baseline);
        let readings = vec![reading(1, 25, 50, 2), reading(2, 50, 50, 4)];

        let priced = build_readings_response(Arc::clone(&state), &readings, NOW);
        let ApiResponse::Success(priced) = priced else {
            panic!("expected priced batch");
        };
        assert_eq!(priced.skipped, Some(0));

        match build_quotes_response(state, NOW) {
            ApiResponse::Success(body) => {
                assert_eq!(body.quotes.len(), 2);
                assert_eq!(body.quotes[0].code.as_deref(), Some("BHMBCCMKT01"));
                assert_eq!(body.quotes[0].price, 12.5);
                assert_eq!(body.quotes[0].timestamp, "2016-10-04T08:00:00Z");
                assert_eq!(body.quotes[1].code, None);
                assert_eq!(body.skipped, None);
            }
            ApiResponse::Error { status, .. } => panic!("expected quotes, got {status}"),
        }
    }

    #[test]
    fn readings_handler_rejects_batch_without_valid_readings() {
        let response = build_readings_response(
            state_with(ModelKind::Baseline),
            &[reading(1, 0, 0, 0)],
            NOW,
        );

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body.error_code, ErrorCode::InvalidReadings);
            }
            ApiResponse::Success(_) => panic!("expected invalid readings error"),
        }
    }

    #[test]
    fn predict_handler_needs_a_fitted_model() {
        let response = build_predict_response(state_with(ModelKind::Competitive), &reading(1, 10, 50, 0), NOW);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::ModelUnavailable);
            }
            ApiResponse::Success(_) => panic!("expected model unavailable error"),
        }
    }

    #[test]
    fn retrain_then_predict_reports_label_and_code() {
        let state = state_with(ModelKind::Competitive);

        let retrained = build_retrain_response(Arc::clone(&state), &history(), NOW);
        let ApiResponse::Success(retrained) = retrained else {
            panic!("expected retrain success");
        };
        assert_eq!(retrained.feature_order.len(), 7);
        assert_eq!(retrained.weights.len(), 8);
        assert!(!retrained.persisted);

        match build_predict_response(state, &reading(1, 10, 50, 0), NOW) {
            ApiResponse::Success(body) => {
                assert_eq!(body.spot_id, 1);
                assert_eq!(body.code.as_deref(), Some("BHMBCCMKT01"));
                assert_eq!(body.traffic, "Moderate");
                assert!(body.reroute.is_none());
                assert!(body.price.is_finite());
            }
            ApiResponse::Error { status, .. } => panic!("expected prediction, got {status}"),
        }
    }

    #[test]
    fn health_is_degraded_until_competitive_model_is_loaded() {
        match build_health_response(state_with(ModelKind::Competitive), NOW) {
            ApiResponse::Success(body) => {
                assert_eq!(body.status, HealthStatus::Degraded);
                assert!(!body.model_loaded);
            }
            ApiResponse::Error { status, .. } => panic!("expected health body, got {status}"),
        }
        match build_health_response(state_with(ModelKind::Demand), NOW) {
            ApiResponse::Success(body) => assert_eq!(body.status, HealthStatus::Ok),
            ApiResponse::Error { status, .. } => panic!("expected health body, got {status}"),
        }
    }

    #[test]
    fn negative_queue_body_gets_invalid_readings_error() {
        let body = br#"[{
            "spot_id": 1,
            "timestamp": "2016-10-04T08:00:00Z",
            "occupancy": 10,
            "capacity": 50,
            "queue_length": -3,
            "vehicle_type": "car",
            "traffic": "low",
            "latitude": 26.144536,
            "longitude": 91.736172
        }]"#;
        let Err(rejection) = Json::<Vec<ParkingReading>>::from_bytes(body) else {
            panic!("negative queue length should not deserialize");
        };

        let response: ApiResponse<QuotesSuccessResponse> = rejected_body("/api/readings", &rejection, NOW);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body.error_code, ErrorCode::InvalidReadings);
                assert_eq!(body.timestamp, "2026-01-11T12:30:00Z");
            }
            ApiResponse::Success(_) => panic!("expected invalid readings error"),
        }
    }

    #[test]
    fn malformed_json_body_is_a_bad_request() {
        let Err(rejection) = Json::<ParkingReading>::from_bytes(b"{not json") else {
            panic!("malformed body should not deserialize");
        };

        let response: ApiResponse<PredictSuccessResponse> = rejected_body("/api/predict", &rejection, NOW);

        assert_eq!(status_of(&response), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn handlers_return_internal_error_when_lock_poisoned() {
        let state = poisoned();

        let quotes = build_quotes_response(Arc::clone(&state), NOW);
        let health = build_health_response(Arc::clone(&state), NOW);
        let readings = build_readings_response(state, &[reading(1, 10, 50, 0)], NOW);

        for status in [status_of(&quotes), status_of(&health), status_of(&readings)] {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    fn status_of<T>(response: &ApiResponse<T>) -> StatusCode {
        match response {
            ApiResponse::Success(_) => StatusCode::OK,
            ApiResponse::Error { status, .. } => *status,
        }
    }
}
