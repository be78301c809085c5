//! HTTP control surface
//!
//! Small axum API for submitting work, polling progress, stopping a running
//! session, and browsing recent history. The session itself runs on its own
//! task so multi-minute pacing waits never block these handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::extract::parse_work_items;
use crate::session::{SessionHandle, SessionOrchestrator, SessionReport, SessionStatus};
use crate::store::{HistoryEntry, SharedStore};

const PROMPT_SETTING_KEY: &str = "source_prompt";
const DEFAULT_PROMPT: &str =
    "Paste post links here, one per line, optionally followed by the post text.";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub handle: SessionHandle,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Free-form pasted text containing post links and optional context.
    pub text: String,
    /// Replies to aim for; defaults to every item supplied.
    pub target_count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub status: &'static str,
    pub message: String,
}

impl ApiMessage {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.into(),
        })
    }

    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "error",
            message: message.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub progress: Option<String>,
    pub progress_log: Vec<String>,
    pub report: Option<SessionReport>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub config: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

/// POST /run - parse pasted text into work items and start a session.
pub async fn run_handler(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> (StatusCode, Json<ApiMessage>) {
    let items = parse_work_items(&request.text);
    if items.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ApiMessage::error("No valid X/Twitter URLs found in the text"),
        );
    }

    let Some(token) = state.handle.try_begin() else {
        return (
            StatusCode::CONFLICT,
            ApiMessage::error("Session already running"),
        );
    };

    let orchestrator = state.orchestrator.clone();
    let handle = state.handle.clone();
    let target = request.target_count;

    tokio::spawn(async move {
        // Run the session on its own task so a panic inside it can be
        // converted into an error report instead of losing the run.
        let session = tokio::spawn({
            let handle = handle.clone();
            async move { orchestrator.run(items, target, &handle, token).await }
        });

        let report = match session.await {
            Ok(report) => report,
            Err(e) => {
                error!("Session task failed: {}", e);
                SessionReport {
                    status: SessionStatus::Error,
                    posted: 0,
                    skipped: 0,
                    failed: 0,
                    errors: vec![e.to_string()],
                    succeeded: Vec::new(),
                    message: Some("session aborted unexpectedly".into()),
                }
            }
        };
        handle.finish(report);
    });

    (
        StatusCode::OK,
        ApiMessage::ok("Session started. Poll /status for updates"),
    )
}

/// GET /status - current session snapshot.
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.handle.is_running(),
        progress: state.handle.latest(),
        progress_log: state.handle.progress(),
        report: state.handle.last_report(),
    })
}

/// POST /stop - request a cooperative stop at the next item boundary.
pub async fn stop_handler(State(state): State<AppState>) -> (StatusCode, Json<ApiMessage>) {
    if state.handle.request_stop() {
        (
            StatusCode::OK,
            ApiMessage::ok("Stop signal sent. The session ends after the current item"),
        )
    } else {
        (
            StatusCode::CONFLICT,
            ApiMessage::error("No session is currently running"),
        )
    }
}

/// GET /history - delivered records in the trailing window, newest first.
pub async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryEntry>> {
    let days = params.days.unwrap_or(state.config.history_days);
    let entries = state.store.lock().history(days).unwrap_or_else(|e| {
        error!("History query failed: {}", e);
        Vec::new()
    });
    Json(entries)
}

/// GET /health - component checks.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = {
        let store = state.store.lock();
        match store.reply_count(chrono::Local::now().date_naive()) {
            Ok(_) => "ok",
            Err(_) => "error",
        }
    };
    let config = match state.config.validate() {
        Ok(()) => "ok",
        Err(_) => "degraded",
    };
    let status = if database == "ok" && config == "ok" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        database,
        config,
    })
}

/// GET /prompt - the persisted source prompt (or the default).
pub async fn get_prompt_handler(State(state): State<AppState>) -> Json<PromptBody> {
    let prompt = state
        .store
        .lock()
        .get_setting(PROMPT_SETTING_KEY)
        .ok()
        .flatten()
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    Json(PromptBody { prompt })
}

/// POST /prompt - persist the source prompt.
pub async fn save_prompt_handler(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> (StatusCode, Json<ApiMessage>) {
    match state.store.lock().set_setting(PROMPT_SETTING_KEY, &body.prompt) {
        Ok(()) => (StatusCode::OK, ApiMessage::ok("Prompt saved")),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiMessage::error(format!("Save failed: {}", e)),
        ),
    }
}

/// POST /prompt/reset - restore the default source prompt.
pub async fn reset_prompt_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiMessage>) {
    match state
        .store
        .lock()
        .set_setting(PROMPT_SETTING_KEY, DEFAULT_PROMPT)
    {
        Ok(()) => (StatusCode::OK, ApiMessage::ok("Prompt reset to default")),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiMessage::error(format!("Reset failed: {}", e)),
        ),
    }
}

/// Build the application router with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/run", post(run_handler))
        .route("/status", get(status_handler))
        .route("/stop", post(stop_handler))
        .route("/history", get(history_handler))
        .route("/health", get(health_handler))
        .route("/prompt", get(get_prompt_handler).post(save_prompt_handler))
        .route("/prompt/reset", post(reset_prompt_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let router = build_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::CooldownGate;
    use crate::delivery::DeliveryClient;
    use crate::error::RemoteError;
    use crate::generator::ReplyGenerator;
    use crate::quota::QuotaTracker;
    use crate::remote::RemoteService;
    use crate::session::PacingConfig;
    use crate::store::Store;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct NullRemote;

    #[async_trait]
    impl RemoteService for NullRemote {
        async fn fetch(&self, _post_id: &str) -> Result<Option<String>, RemoteError> {
            Ok(None)
        }
        async fn deliver(&self, _post_id: &str, _text: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn reconnect(&self) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    struct NullGenerator;

    #[async_trait]
    impl ReplyGenerator for NullGenerator {
        async fn generate(
            &self,
            _content: &str,
            _recent: &[String],
        ) -> anyhow::Result<Option<String>> {
            Ok(Some("a reply".into()))
        }
    }

    fn test_state() -> AppState {
        let store: SharedStore =
            Arc::new(parking_lot::Mutex::new(Store::open_in_memory().unwrap()));
        let config = Config {
            x_bearer_token: None,
            x_access_token: None,
            openai_api_key: None,
            db_path: PathBuf::from(":memory:"),
            bind_addr: "127.0.0.1".into(),
            port: 0,
            daily_reply_limit: 50,
            reply_delay_min: 0,
            reply_delay_max: 0,
            batch_size: 10,
            batch_break_min: 0,
            batch_break_max: 0,
            history_days: 3,
        };
        let quota = QuotaTracker::new(store.clone(), config.daily_reply_limit);
        let delivery = DeliveryClient::new(Arc::new(NullRemote), CooldownGate::new());
        let orchestrator = Arc::new(SessionOrchestrator::new(
            delivery,
            Arc::new(NullGenerator),
            store.clone(),
            quota,
            PacingConfig::immediate(),
        ));

        AppState {
            store,
            orchestrator,
            handle: SessionHandle::new(),
            config,
        }
    }

    #[tokio::test]
    async fn test_run_rejects_empty_input() {
        let state = test_state();
        let (code, body) = run_handler(
            State(state),
            Json(RunRequest {
                text: "no links here".into(),
                target_count: None,
            }),
        )
        .await;

        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn test_run_rejects_concurrent_session() {
        let state = test_state();
        // Claim the slot as if a session were mid-flight.
        let _token = state.handle.try_begin().unwrap();

        let (code, _) = run_handler(
            State(state),
            Json(RunRequest {
                text: "https://x.com/u/status/1".into(),
                target_count: None,
            }),
        )
        .await;

        assert_eq!(code, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let state = test_state();
        let (code, body) = stop_handler(State(state)).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn test_status_idle() {
        let state = test_state();
        let response = status_handler(State(state)).await;
        assert!(!response.running);
        assert!(response.report.is_none());
        assert!(response.progress_log.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_degraded_config() {
        let state = test_state();
        let response = health_handler(State(state)).await;
        assert_eq!(response.database, "ok");
        // No credentials configured in tests; the missing config must pull
        // the overall status down.
        assert_eq!(response.config, "degraded");
        assert_eq!(response.status, "degraded");
    }

    #[tokio::test]
    async fn test_health_ok_with_full_config() {
        let mut state = test_state();
        state.config.x_bearer_token = Some("bearer".into());
        state.config.x_access_token = Some("access".into());
        state.config.openai_api_key = Some("key".into());

        let response = health_handler(State(state)).await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.config, "ok");
    }

    #[tokio::test]
    async fn test_prompt_roundtrip() {
        let state = test_state();

        let initial = get_prompt_handler(State(state.clone())).await;
        assert_eq!(initial.prompt, DEFAULT_PROMPT);

        let (code, _) = save_prompt_handler(
            State(state.clone()),
            Json(PromptBody {
                prompt: "custom prompt".into(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::OK);

        let saved = get_prompt_handler(State(state.clone())).await;
        assert_eq!(saved.prompt, "custom prompt");

        reset_prompt_handler(State(state.clone())).await;
        let reset = get_prompt_handler(State(state)).await;
        assert_eq!(reset.prompt, DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn test_history_empty() {
        let state = test_state();
        let response = history_handler(State(state), Query(HistoryParams { days: None })).await;
        assert!(response.is_empty());
    }
}
