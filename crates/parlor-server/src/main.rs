mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use parlor_api::csrf::{CsrfConfig, CsrfToken, csrf_protect};
use parlor_db::Database;

use crate::config::Config;

type AppState = Arc<Database>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parlor_server=debug,parlor_api=debug,parlor_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Shared handle for every repository
    let db: AppState = Arc::new(Database::open(&config.db_path)?);

    let csrf = CsrfConfig::new(config.csrf_key.into_bytes())
        .with_trusted_origins(config.csrf_trusted_origins);

    let app = Router::new()
        .route("/health", get(health))
        .route("/csrf", get(csrf_token))
        .with_state(db)
        .layer(middleware::from_fn_with_state(Arc::new(csrf), csrf_protect))
        .layer(TraceLayer::new_for_http());

    info!("Parlor server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(db): State<AppState>) -> StatusCode {
    let pinged = tokio::task::spawn_blocking(move || db.ping()).await;
    match pinged {
        Ok(Ok(())) => StatusCode::OK,
        Ok(Err(e)) => {
            error!("Database health check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn csrf_token(token: CsrfToken) -> impl IntoResponse {
    Json(json!({ "token": token.0 }))
}
