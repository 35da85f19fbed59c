use crate::config::{self, FileConfig};
use crate::error::{AppError, AppResult};
use axum::Router;
use axum::routing::{get, post};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone, Debug)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub file_config: Arc<Option<FileConfig>>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn file_config(&self) -> Option<&FileConfig> {
        self.file_config.as_ref().as_ref()
    }

    /// Listen address precedence: env override, then the config file's PORT,
    /// then the default port.
    pub fn listen_addr(&self) -> String {
        if let Some(listen) = &self.runtime.listen {
            return listen.clone();
        }
        let port = self
            .file_config()
            .and_then(|config| config.port)
            .unwrap_or(8000);
        format!("0.0.0.0:{port}")
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: Option<String>,
    pub config_path: PathBuf,
    /// Total ceiling for one upstream chat call. Defaults to the relay's
    /// 300 s contract; tests shrink it to exercise the timeout path.
    pub chat_timeout: std::time::Duration,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let listen = std::env::var("CHATRELAY_LISTEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let config_path = std::env::var("CHATRELAY_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.txt"));
        Self {
            listen,
            config_path,
            chat_timeout: crate::upstream::CHAT_TIMEOUT,
        }
    }
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let file_config = config::load(&runtime.config_path)?;
    match &file_config {
        Some(config) => {
            tracing::info!(api_url = %config.api_url, "static upstream configured");
        }
        None => {
            tracing::info!(
                path = %runtime.config_path.display(),
                "no config file, serving header-credential requests only"
            );
        }
    }

    let http = reqwest::Client::builder().build().map_err(|err| {
        AppError::bad_request("http_client_init_failed", err.to_string())
    })?;

    Ok(AppState {
        runtime: Arc::new(runtime),
        file_config: Arc::new(file_config),
        http,
    })
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(crate::handlers::root))
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::chat_completions),
        )
        .with_state(state)
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
