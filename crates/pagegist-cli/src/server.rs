use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pagegist_local::PipelineController;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Default, Deserialize)]
struct SummarizeBody {
    #[serde(default)]
    url: Option<String>,
}

pub fn router(controller: Arc<PipelineController>) -> Router {
    // Called from browser extensions, so any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/summarize", post(summarize))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "name": "pagegist", "version": env!("CARGO_PKG_VERSION") }))
}

async fn summarize(State(controller): State<Arc<PipelineController>>, body: Bytes) -> Response {
    // A missing or malformed body is the same client error as a missing `url`.
    let url = serde_json::from_slice::<SummarizeBody>(&body)
        .unwrap_or_default()
        .url
        .unwrap_or_default();
    tracing::info!(url = %url, "summarize request");

    match controller.run(&url).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(e.to_body())).into_response()
        }
    }
}

pub async fn serve(addr: SocketAddr, controller: Arc<PipelineController>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(controller)).await?;
    Ok(())
}
