//! Core library for ImobFlash. This module wires together the wire types,
//! the shared application state, and the HTTP handlers that drive the
//! analysis flow: validate the request, ask the model provider for a JSON
//! verdict, then make a best-effort attempt to persist it.

mod config;
pub mod error;
pub mod prompts;
pub mod services;
pub mod util;

pub use config::AppConfig;
pub use error::Error;

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, State,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::openai::OpenAiAnalyzer;
use crate::services::supabase::SupabaseStore;
use crate::services::{AnalysisStore, Analyzer};
use crate::util::Timestamp;

pub use crate::prompts::PromptPair;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Client,
    Agent,
}

/// The closed set of analyses the service knows how to prompt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Summary,
    Sentiment,
    Intent,
    LeadQuality,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::Summary,
        AnalysisType::Sentiment,
        AnalysisType::Intent,
        AnalysisType::LeadQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Summary => "summary",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Intent => "intent",
            AnalysisType::LeadQuality => "lead_quality",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown analysis type: {}", s)))
    }
}

/// A single conversation message. The timestamp is normalized on
/// deserialization; unparseable values become the current time.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(deserialize_with = "util::deserialize_timestamp")]
    pub timestamp: Timestamp,
    pub sender: Sender,
    /// Response time reported by the capture client, if any.
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisRequest {
    pub conversation_id: String,
    /// Conversation order is the order of this list.
    pub messages: Vec<Message>,
    pub analysis_type: AnalysisType,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnalysisResponse {
    pub success: bool,
    pub conversation_id: String,
    pub analysis_type: String,
    /// Shape depends on `analysis_type`; present only on success.
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    /// Present only when the analysis itself failed.
    pub error: Option<String>,
}

impl AnalysisResponse {
    fn succeeded(req: &AnalysisRequest, result: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            conversation_id: req.conversation_id.clone(),
            analysis_type: req.analysis_type.to_string(),
            result: Some(result),
            error: None,
        }
    }

    fn failed(req: &AnalysisRequest, error: String) -> Self {
        Self {
            success: false,
            conversation_id: req.conversation_id.clone(),
            analysis_type: req.analysis_type.to_string(),
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub detail: String,
}

fn respond_with_error(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// Internal application state shared across handlers. The adapters are
/// optional: a missing one means the feature is unavailable, which the
/// handlers check through [`AppState::llm_ready`] and [`AppState::store_ready`].
#[derive(Clone)]
pub struct AppState {
    analyzer: Option<Arc<dyn Analyzer>>,
    store: Option<Arc<dyn AnalysisStore>>,
    pub cors_origins: Vec<String>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
}

impl AppState {
    pub fn new(analyzer: Option<Arc<dyn Analyzer>>, store: Option<Arc<dyn AnalysisStore>>) -> Self {
        Self {
            analyzer,
            store,
            cors_origins: Vec::new(),
            max_request_bytes: None,
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_max_request_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_request_bytes = limit;
        self
    }

    pub fn llm_ready(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn store_ready(&self) -> bool {
        self.store.is_some()
    }
}

/// Build state from a resolved configuration. Adapters whose credentials
/// are missing, or whose clients fail to build, are left out so the
/// service still starts with reduced capability.
pub fn build_state(config: &AppConfig) -> AppState {
    let analyzer: Option<Arc<dyn Analyzer>> = if config.openai_configured() {
        match OpenAiAnalyzer::from_config(config) {
            Ok(client) => {
                tracing::info!(model = %client.model(), "OpenAI analyzer initialised");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialise OpenAI analyzer");
                None
            }
        }
    } else {
        tracing::warn!("OpenAI is not configured: OPENAI_API_KEY is empty");
        None
    };

    let store: Option<Arc<dyn AnalysisStore>> = if config.supabase_configured() {
        match SupabaseStore::from_config(config) {
            Ok(client) => {
                tracing::info!("Supabase store initialised");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialise Supabase store");
                None
            }
        }
    } else {
        tracing::warn!("Supabase is not configured: SUPABASE_URL or SUPABASE_KEY is empty");
        None
    };

    AppState::new(analyzer, store)
        .with_cors_origins(config.cors_origins.clone())
        .with_max_request_bytes(config.max_request_bytes)
}

/// Build state from environment variables. See [`AppConfig::from_env`] for
/// the variables read.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    Ok(build_state(&config))
}

/// Build the Axum router and attach handlers and middleware.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/", get(root_handler))
        .route("/api/analysis/health", get(health_handler))
        .route("/api/analysis/analyze", post(analyze_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = AllowMethods::mirror_request();
    let headers = AllowHeaders::mirror_request();
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(tower_http::cors::Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "skipping invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_credentials(true)
        .allow_methods(methods)
        .allow_headers(headers)
}

fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Last-resort conversion for panics outside the adapter calls.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(err.as_ref());
    tracing::error!(panic = %detail, "unexpected failure while handling request");
    respond_with_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error processing analysis: {}", detail),
    )
}

/// Service banner.
async fn root_handler() -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "message": "ImobFlash API is running",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Reports which adapters are available.
async fn health_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "openai_configured": state.llm_ready(),
        "supabase_configured": state.store_ready(),
        "status": "ok",
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Handler for `/api/analysis/analyze`.
///
/// Analysis failures (provider errors, non-JSON output, a panicking
/// adapter) are business-level failures: they come back as 200 with
/// `success=false`. Persistence runs after a successful analysis and never
/// changes the response. The body is parsed as JSON whatever the
/// `Content-Type` header says.
async fn analyze_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let payload = body
        .map_err(JsonRejection::from)
        .and_then(|bytes| Json::<AnalysisRequest>::from_bytes(&bytes));
    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };

    let Some(analyzer) = state.analyzer.as_ref() else {
        return respond_with_error(StatusCode::SERVICE_UNAVAILABLE, "OpenAI is not configured");
    };

    if request.messages.is_empty() {
        return respond_with_error(StatusCode::BAD_REQUEST, "Message list is empty");
    }

    tracing::info!(
        conversation_id = %request.conversation_id,
        analysis_type = %request.analysis_type,
        message_count = request.messages.len(),
        "starting analysis"
    );

    let outcome = AssertUnwindSafe(analyzer.analyze(&request.messages, request.analysis_type))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(
                conversation_id = %request.conversation_id,
                analysis_type = %request.analysis_type,
                error = %e,
                "analysis failed"
            );
            let body = AnalysisResponse::failed(&request, e.to_string());
            return (StatusCode::OK, Json(body)).into_response();
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            tracing::error!(
                conversation_id = %request.conversation_id,
                analysis_type = %request.analysis_type,
                panic = %detail,
                "analyzer panicked"
            );
            let body = AnalysisResponse::failed(&request, detail);
            return (StatusCode::OK, Json(body)).into_response();
        }
    };

    if let Some(store) = state.store.as_ref() {
        let saved = AssertUnwindSafe(store.save_analysis(
            &request.conversation_id,
            request.analysis_type,
            &result,
        ))
        .catch_unwind()
        .await;
        match saved {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => tracing::warn!(
                conversation_id = %request.conversation_id,
                "analysis was not persisted"
            ),
            Ok(Err(e)) => tracing::warn!(
                conversation_id = %request.conversation_id,
                error = %e,
                "error saving analysis"
            ),
            Err(panic) => tracing::error!(
                conversation_id = %request.conversation_id,
                panic = %panic_message(panic.as_ref()),
                "store panicked while saving analysis"
            ),
        }
    }

    let body = AnalysisResponse::succeeded(&request, result);
    (StatusCode::OK, Json(body)).into_response()
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded limit");
            let detail = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            respond_with_error(StatusCode::PAYLOAD_TOO_LARGE, detail)
        }
        JsonRejection::JsonDataError(err) => {
            respond_with_error(StatusCode::UNPROCESSABLE_ENTITY, err.body_text())
        }
        JsonRejection::JsonSyntaxError(err) => {
            respond_with_error(StatusCode::UNPROCESSABLE_ENTITY, err.body_text())
        }
        other => respond_with_error(other.status(), other.body_text()),
    }
}
