use crate::pricing::model::ModelKind;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub pricing_model: ModelKind,
    pub model_loaded: bool,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct QuoteResponse {
    pub spot_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub price: f64,
    pub model: ModelKind,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct QuotesSuccessResponse {
    pub quotes: Vec<QuoteResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RerouteResponse {
    pub spot_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictSuccessResponse {
    pub spot_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub price: f64,
    pub traffic: String,
    pub reroute: Option<RerouteResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RetrainSuccessResponse {
    pub feature_order: Vec<String>,
    pub weights: Vec<f64>,
    pub base_price: f64,
    pub persisted: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoData,
    InvalidReadings,
    ModelUnavailable,
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_response_omits_code_when_unknown() {
        let response = QuoteResponse {
            spot_id: 7,
            code: None,
            price: 12.5,
            model: ModelKind::Baseline,
            timestamp: "2016-10-04T08:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize quote response");
        assert_eq!(
            value,
            json!({
                "spot_id": 7,
                "price": 12.5,
                "model": "baseline",
                "timestamp": "2016-10-04T08:00:00Z"
            })
        );
    }

    #[test]
    fn predict_response_serializes_null_reroute() {
        let response = PredictSuccessResponse {
            spot_id: 1,
            code: Some("BHMBCCMKT01".to_string()),
            price: 13.42,
            traffic: "Moderate".to_string(),
            reroute: None,
            timestamp: "2016-10-04T08:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize predict response");
        assert_eq!(
            value,
            json!({
                "spot_id": 1,
                "code": "BHMBCCMKT01",
                "price": 13.42,
                "traffic": "Moderate",
                "reroute": null,
                "timestamp": "2016-10-04T08:00:00Z"
            })
        );
    }

    #[test]
    fn health_response_serializes_status() {
        let response = HealthSuccessResponse {
            status: HealthStatus::Degraded,
            pricing_model: ModelKind::Competitive,
            model_loaded: false,
            version: "0.1.0".to_string(),
            timestamp: "2026-01-11T12:33:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize health response");
        assert_eq!(
            value,
            json!({
                "status": "degraded",
                "pricing_model": "competitive",
                "model_loaded": false,
                "version": "0.1.0",
                "timestamp": "2026-01-11T12:33:00Z"
            })
        );
    }

    #[test]
    fn error_response_uses_screaming_snake_case_code() {
        let response = ErrorResponse {
            error_code: ErrorCode::ModelUnavailable,
            error_message: "no fitted regression model available".to_string(),
            timestamp: "2026-01-11T12:32:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize error response");
        assert_eq!(
            value,
            json!({
                "error_code": "MODEL_UNAVAILABLE",
                "error_message": "no fitted regression model available",
                "timestamp": "2026-01-11T12:32:00Z"
            })
        );
    }
}
