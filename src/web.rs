use crate::{
    catalog::ProductRecord,
    config::ServerConfig,
    engine::{
        EngineError, EngineStatus, RecommendationEngine, RecommendationResponse,
        DEFAULT_RECOMMENDATIONS,
    },
};
use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
struct SharedState {
    engine: Arc<RecommendationEngine>,
}

/// Build the HTTP router around an engine.
pub fn router(
    engine: Arc<RecommendationEngine>,
    cors_origins: &[String],
) -> anyhow::Result<Router> {
    let origins = cors_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let shared_state = Arc::new(SharedState { engine });

    Ok(Router::new()
        .route("/", get(status))
        .route("/api/recommend", post(recommend))
        .route("/api/products", get(products))
        .layer(cors)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state))
}

async fn start_app(engine: RecommendationEngine, server: &ServerConfig) -> anyhow::Result<()> {
    let app = router(Arc::new(engine), &server.cors_origins)?;

    let listener = tokio::net::TcpListener::bind(&server.listen)
        .await
        .with_context(|| format!("failed to bind {}", server.listen))?;
    log::info!("listening on {}", server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
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
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn start_daemon(engine: RecommendationEngine, server: &ServerConfig) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(engine, server))
}

#[derive(Debug)]
struct HttpError(EngineError);

// Tell axum how to convert `EngineError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            EngineError::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidCount => StatusCode::BAD_REQUEST,
            EngineError::Embedding(_)
            | EngineError::Ranking(_)
            | EngineError::Catalog(_)
            | EngineError::Internal(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<EngineError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecommendRequest {
    pub query: String,

    #[serde(default = "default_num_recommendations")]
    pub num_recommendations: i64,
}

fn default_num_recommendations() -> i64 {
    DEFAULT_RECOMMENDATIONS as i64
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<EngineStatus> {
    state.engine.status().into()
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RecommendRequest>,
) -> Result<Json<RecommendationResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let k = usize::try_from(payload.num_recommendations).map_err(|_| EngineError::InvalidCount)?;

    let response = state.engine.respond(&payload.query, k).await?;
    Ok(response.into())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductsResponse {
    pub total: usize,
    pub products: Vec<ProductRecord>,
}

async fn products(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ProductsResponse>, HttpError> {
    let products = state.engine.products()?.to_vec();
    Ok(ProductsResponse {
        total: products.len(),
        products,
    }
    .into())
}
