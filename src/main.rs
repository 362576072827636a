use dynamic_parking::{api, config, regression, state};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        pricing_model = %config.pricing.model,
        spots = config.spots.len(),
        "dynamic-parking starting"
    );

    let mut app_state = state::AppState::with_settings(config.pricing.clone(), config.spots.clone())
        .with_model_path(config.model_path().map(|path| path.to_path_buf()));

    // Load the fitted competitive model, if one was saved
    match config.model_path() {
        Some(path) => match regression::load_model_from_path(path) {
            Ok(model) => {
                tracing::info!(
                    path = %path.display(),
                    features = model.feature_order().len(),
                    "Regression model loaded"
                );
                app_state.set_regression(Arc::new(model));
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load regression model, retrain before using the competitive model"
                );
            }
        },
        None => {
            tracing::info!("No model path configured, competitive model needs a retrain");
        }
    }

    let state = Arc::new(RwLock::new(app_state));
    let app = api::router(Arc::clone(&state));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
