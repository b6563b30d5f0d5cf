use std::{net::SocketAddr, sync::Arc, time::Duration, time::Instant};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, signal, task};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    config::ServerConfig,
    recognizer::{PredictRequest, PredictResponse, RecognizeError, Recognizer},
};

#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<Recognizer>,
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Sign Language Recognition API",
        "status": "running",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn labels(State(state): State<Arc<AppState>>) -> Json<Value> {
    let classifier = state.recognizer.classifier();
    Json(json!({
        "labels": classifier.labels().as_slice(),
        "top_k": state.recognizer.top_k(),
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Json<PredictResponse> {
    let started = Instant::now();
    let recognizer = state.recognizer.clone();

    let response = task::spawn_blocking(move || recognizer.recognize(&req.image))
        .await
        .unwrap_or_else(|err| {
            let err = RecognizeError::Task(err.to_string());
            log::error!("{err}");
            PredictResponse::failure(err.to_string(), started)
        });

    Json(response)
}

pub fn build_app(
    recognizer: Arc<Recognizer>,
    max_payload_size: usize,
    cors_allowed_origins: Vec<String>,
) -> Router {
    let app_state = Arc::new(AppState { recognizer });

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/labels", get(labels))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_payload_size))
        .layer(create_cors_layer(cors_allowed_origins))
        .with_state(app_state)
}

pub async fn serve(config: ServerConfig, recognizer: Arc<Recognizer>) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let app = build_app(
        recognizer,
        config.max_payload_size,
        config.cors_allowed_origins,
    );

    let listener = TcpListener::bind(addr).await?;
    log::info!("sign recognition API listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            log::info!("received terminate signal, starting graceful shutdown");
        },
    }
}

fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<http::HeaderValue> = allowed_origins
            .into_iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
    };

    cors.max_age(Duration::from_secs(3600))
}
