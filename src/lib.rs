pub mod application;
pub mod domain;
pub mod infrastructure;

use application::analyzer::{
    analyze_impl, auth_callback_impl, email_state_impl, start_auth_impl, AnalyzeRequest,
};
use application::bootstrap::bootstrap_workspace;
use application::commands::{
    calendar_impl, connect_account_impl, create_note_impl, create_task_impl, delete_account_impl,
    delete_note_impl, delete_task_impl, get_note_impl, list_accounts_impl, list_notes_impl,
    list_tasks_impl, return_task_to_today_impl, update_account_impl, update_note_impl,
    update_task_impl, AccountUpdate, AppState, CreateTaskRequest, NoteInput, TaskPatch,
};
use application::extracted::{
    add_extracted_to_calendar_impl, create_extracted_impl, delete_extracted_impl,
    ingest_extracted_impl, list_extracted_impl, update_extracted_impl, ExtractedTaskInput,
    ExtractedTaskPatch,
};
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use infrastructure::config::{load_app_config, optional_lookup_value, AppConfig, LogFormat};
use infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

type SharedState = Arc<AppState>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn from_command(state: &AppState, command: &str, error: InfraError) -> Self {
        let status = match &error {
            InfraError::Validation(_) => StatusCode::BAD_REQUEST,
            InfraError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: state.command_error(command, &error),
        }
    }

    fn rejected(rejection: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedQuery {
    id: Option<String>,
    account: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoveQuery {
    remove: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthCallbackQuery {
    auth: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailBody {
    email: String,
}

fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    extracted.map(|Query(value)| value).map_err(ApiError::rejected)
}

fn body<T>(extracted: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    extracted.map(|Json(value)| value).map_err(ApiError::rejected)
}

fn required_id(state: &AppState, command: &str, id: Option<String>) -> Result<String, ApiError> {
    id.filter(|value| !value.trim().is_empty()).ok_or_else(|| {
        ApiError::from_command(state, command, InfraError::validation("id is required"))
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_tasks(
    State(state): State<SharedState>,
    params: Result<Query<DateQuery>, QueryRejection>,
) -> ApiResult<application::commands::TaskListResponse> {
    let params = query(params)?;
    list_tasks_impl(&state, params.date)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "list_tasks", error))
}

async fn create_task(
    State(state): State<SharedState>,
    request: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(request)?;
    create_task_impl(&state, request)
        .map(|task| (StatusCode::CREATED, Json(task)))
        .map_err(|error| ApiError::from_command(&state, "create_task", error))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    patch: Result<Json<TaskPatch>, JsonRejection>,
) -> ApiResult<domain::models::Task> {
    let patch = body(patch)?;
    update_task_impl(&state, id, patch)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "update_task", error))
}

async fn return_task_to_today(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<domain::models::Task> {
    return_task_to_today_impl(&state, id)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "return_task_to_today", error))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<application::commands::DeletedResponse> {
    delete_task_impl(&state, id)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "delete_task", error))
}

async fn list_extracted(
    State(state): State<SharedState>,
    params: Result<Query<ExtractedQuery>, QueryRejection>,
) -> ApiResult<Vec<domain::models::ExtractedTask>> {
    let params = query(params)?;
    list_extracted_impl(&state, params.account)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "list_extracted", error))
}

/// `?action=ingest` switches from a single create to the bulk upsert.
async fn create_extracted(
    State(state): State<SharedState>,
    params: Result<Query<ExtractedQuery>, QueryRejection>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let params = query(params)?;
    let payload = body(payload)?;

    if params.action.as_deref().map(str::trim) == Some("ingest") {
        return ingest_extracted_impl(&state, payload)
            .map(|response| Json(response).into_response())
            .map_err(|error| ApiError::from_command(&state, "ingest_extracted", error));
    }

    let input: ExtractedTaskInput = serde_json::from_value(payload).map_err(ApiError::rejected)?;
    create_extracted_impl(&state, input)
        .map(|record| (StatusCode::CREATED, Json(record)).into_response())
        .map_err(|error| ApiError::from_command(&state, "create_extracted", error))
}

async fn update_extracted_by_query(
    State(state): State<SharedState>,
    params: Result<Query<ExtractedQuery>, QueryRejection>,
    patch: Result<Json<ExtractedTaskPatch>, JsonRejection>,
) -> ApiResult<domain::models::ExtractedTask> {
    let id = required_id(&state, "update_extracted", query(params)?.id)?;
    update_extracted(State(state), Path(id), patch).await
}

async fn update_extracted(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    patch: Result<Json<ExtractedTaskPatch>, JsonRejection>,
) -> ApiResult<domain::models::ExtractedTask> {
    let patch = body(patch)?;
    update_extracted_impl(&state, id, patch)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "update_extracted", error))
}

async fn delete_extracted_by_query(
    State(state): State<SharedState>,
    params: Result<Query<ExtractedQuery>, QueryRejection>,
) -> ApiResult<application::commands::DeletedResponse> {
    let id = required_id(&state, "delete_extracted", query(params)?.id)?;
    delete_extracted(State(state), Path(id)).await
}

async fn delete_extracted(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<application::commands::DeletedResponse> {
    delete_extracted_impl(&state, id)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "delete_extracted", error))
}

async fn add_extracted_to_calendar(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: Result<Query<RemoveQuery>, QueryRejection>,
) -> ApiResult<application::extracted::AddToCalendarResponse> {
    let remove = query(params)?.remove.unwrap_or(false);
    add_extracted_to_calendar_impl(&state, id, remove)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "add_extracted_to_calendar", error))
}

async fn list_accounts(
    State(state): State<SharedState>,
) -> ApiResult<Vec<domain::models::SourceAccount>> {
    list_accounts_impl(&state)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "list_accounts", error))
}

async fn connect_account(
    State(state): State<SharedState>,
    request: Result<Json<EmailBody>, JsonRejection>,
) -> ApiResult<domain::models::SourceAccount> {
    let request = body(request)?;
    connect_account_impl(&state, request.email)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "connect_account", error))
}

async fn update_account(
    State(state): State<SharedState>,
    update: Result<Json<AccountUpdate>, JsonRejection>,
) -> ApiResult<domain::models::SourceAccount> {
    let update = body(update)?;
    update_account_impl(&state, update)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "update_account", error))
}

async fn delete_account(
    State(state): State<SharedState>,
    params: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResult<application::commands::DeletedAccountResponse> {
    let email = query(params)?.email.unwrap_or_default();
    delete_account_impl(&state, email)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "delete_account", error))
}

async fn list_notes(State(state): State<SharedState>) -> ApiResult<Vec<domain::models::Note>> {
    list_notes_impl(&state)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "list_notes", error))
}

async fn create_note(
    State(state): State<SharedState>,
    input: Result<Json<NoteInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let input = body(input)?;
    create_note_impl(&state, input)
        .map(|note| (StatusCode::CREATED, Json(note)))
        .map_err(|error| ApiError::from_command(&state, "create_note", error))
}

async fn get_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<domain::models::Note> {
    get_note_impl(&state, id)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "get_note", error))
}

async fn update_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    input: Result<Json<NoteInput>, JsonRejection>,
) -> ApiResult<domain::models::Note> {
    let input = body(input)?;
    update_note_impl(&state, id, input)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "update_note", error))
}

async fn delete_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<application::commands::DeletedResponse> {
    delete_note_impl(&state, id)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "delete_note", error))
}

async fn calendar(
    State(state): State<SharedState>,
    params: Result<Query<CalendarQuery>, QueryRejection>,
) -> ApiResult<application::commands::CalendarResponse> {
    let params = query(params)?;
    calendar_impl(&state, params.start, params.end)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "calendar", error))
}

async fn analyzer_start_auth(
    State(state): State<SharedState>,
    request: Result<Json<EmailBody>, JsonRejection>,
) -> ApiResult<infrastructure::analyzer_client::StartAuthResponse> {
    let request = body(request)?;
    start_auth_impl(&state, request.email)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "start_auth", error))
}

/// An empty body analyzes every connected account.
async fn analyzer_analyze(
    State(state): State<SharedState>,
    raw: Bytes,
) -> ApiResult<application::analyzer::AnalyzeResult> {
    let request = if raw.iter().all(u8::is_ascii_whitespace) {
        AnalyzeRequest::default()
    } else {
        serde_json::from_slice(&raw).map_err(ApiError::rejected)?
    };
    analyze_impl(&state, request)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "analyze", error))
}

async fn analyzer_email_state(State(state): State<SharedState>) -> ApiResult<serde_json::Value> {
    email_state_impl(&state)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "email_state", error))
}

async fn auth_callback(
    State(state): State<SharedState>,
    params: Result<Query<AuthCallbackQuery>, QueryRejection>,
) -> ApiResult<application::analyzer::AuthCallbackResponse> {
    let params = query(params)?;
    auth_callback_impl(&state, params.auth, params.email)
        .map(Json)
        .map_err(|error| ApiError::from_command(&state, "auth_callback", error))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let origins = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(origin = %origin, %error, "ignoring invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(state.config());
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", patch(update_task).delete(delete_task))
        .route("/tasks/:id/today", post(return_task_to_today))
        .route(
            "/extracted",
            get(list_extracted)
                .post(create_extracted)
                .patch(update_extracted_by_query)
                .delete(delete_extracted_by_query),
        )
        .route(
            "/extracted/:id",
            patch(update_extracted).delete(delete_extracted),
        )
        .route("/extracted/:id/calendar", post(add_extracted_to_calendar))
        .route(
            "/accounts",
            get(list_accounts)
                .post(connect_account)
                .patch(update_account)
                .delete(delete_account),
        )
        .route("/notes", get(list_notes).post(create_note))
        .route(
            "/notes/:id",
            get(get_note).patch(update_note).delete(delete_note),
        )
        .route("/calendar", get(calendar))
        .route("/analyzer/start_auth", post(analyzer_start_auth))
        .route("/analyzer/analyze", post(analyzer_analyze))
        .route("/analyzer/email_state", get(analyzer_email_state))
        .route("/auth/callback", get(auth_callback))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

pub async fn run() -> Result<(), InfraError> {
    let workspace_root =
        match optional_lookup_value(&|key: &str| std::env::var(key).ok(), &["DAYBOOK_WORKSPACE"]) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?,
        };

    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let config = load_app_config(&bootstrap.config_dir)?;
    init_tracing(&config);

    let listen = config.listen;
    let state = Arc::new(AppState::new(&bootstrap, config)?);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(
        %listen,
        workspace = %bootstrap.workspace_root.display(),
        database = %bootstrap.database_path.display(),
        "daybook listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("daybook stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
    }
}
