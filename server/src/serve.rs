use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Args;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::analysis::{self, AnalysisParams, CommandEngine, WinstonLutzEngine};
use crate::error::{AppError, JsonBody};
use crate::files::{self, FileStore};
use crate::issues::{IssueTracker, IssueTrackerConfig, DEFAULT_API_URL, DEFAULT_REPO};
use crate::metadata::{MetadataStore, MAX_FILENAME_LEN};
use crate::pages;

const CACHE_PAGE: &str = "no-cache";
const CACHE_STATIC: &str = "public, max-age=31536000, immutable";
const CACHE_DEFAULT: &str = "no-store";

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
    /// Root of the static tree; uploads and plots live under images/
    #[arg(long, default_value = "app/static")]
    pub static_root: PathBuf,
    /// SQLite database recording the current uploads
    #[arg(long, default_value = "instance/uploads.db")]
    pub database: PathBuf,
    /// Program that performs the Winston-Lutz analysis
    #[arg(long, env = "WL_ENGINE_PROGRAM", default_value = "wl-engine")]
    pub engine_program: PathBuf,
    /// Extra leading argument for the engine program (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
    #[arg(long, env = "GITHUB_REPO", default_value = DEFAULT_REPO)]
    pub github_repo: String,
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub github_api_url: String,
    #[arg(long, default_value_t = 512)]
    pub max_upload_mb: usize,
    #[arg(long, default_value_t = 4)]
    pub tokio_workers: usize,
}

#[derive(Clone)]
pub struct AppState {
    files: FileStore,
    metadata: Arc<Mutex<MetadataStore>>,
    engine: Arc<dyn WinstonLutzEngine>,
    issues: IssueTracker,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        files: FileStore,
        metadata: MetadataStore,
        engine: Arc<dyn WinstonLutzEngine>,
        issues: IssueTracker,
    ) -> Self {
        Self {
            files,
            metadata: Arc::new(Mutex::new(metadata)),
            engine,
            issues,
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    fn metadata(&self) -> Result<MutexGuard<'_, MetadataStore>, AppError> {
        self.metadata
            .lock()
            .map_err(|_| AppError::Internal("metadata store lock poisoned".to_string()))
    }
}

pub fn run(args: ServeArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.tokio_workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: ServeArgs) -> Result<()> {
    let files = FileStore::new(&args.static_root);
    files
        .ensure_dirs()
        .with_context(|| format!("preparing {}", args.static_root.display()))?;
    let metadata = MetadataStore::open(&args.database)
        .with_context(|| format!("opening {}", args.database.display()))?;
    let engine = CommandEngine::new(&args.engine_program, args.engine_args.clone());
    let issues = IssueTracker::new(IssueTrackerConfig {
        api_url: args.github_api_url.clone(),
        repo: args.github_repo.clone(),
        token: args.github_token.clone(),
    });
    info!(
        "static_root={} database={} engine={} github_repo={} github_token_set={}",
        args.static_root.display(),
        args.database.display(),
        args.engine_program.display(),
        args.github_repo,
        args.github_token.is_some()
    );

    let state = AppState::new(files, metadata, Arc::new(engine), issues)
        .with_max_upload_bytes(args.max_upload_mb * 1024 * 1024);
    let app = router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Full application router, static files included.
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(state.files.static_root());
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/page2", get(page2))
        .route("/modules", get(modules))
        .route("/healthz", get(healthz))
        .route("/files", get(list_files))
        .route("/upload", post(upload))
        .route("/remove_file", post(remove_file))
        .route("/clear_files", post(clear_files))
        .route("/check_files", get(check_files))
        .route("/analyze", post(analyze))
        .route("/submit-issue", post(submit_issue))
        .route("/get-issues", get(get_issues))
        .nest_service("/static", static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(response_headers))
        .layer(TraceLayer::new_for_http())
}

/// Cache policy for a request path. Uploads and plots are rewritten in place
/// under the static tree, so they are never cached.
pub fn cache_policy(path: &str) -> &'static str {
    match path {
        "/" | "/page2" | "/modules" => CACHE_PAGE,
        p if p.starts_with("/static/") => {
            let rel = &p["/static/".len()..];
            let generated = [files::UPLOAD_SUBDIR, files::ANALYZED_SUBDIR]
                .iter()
                .any(|dir| rel.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/')));
            if generated {
                CACHE_DEFAULT
            } else {
                CACHE_STATIC
            }
        }
        _ => CACHE_DEFAULT,
    }
}

async fn response_headers(req: Request, next: Next) -> Response {
    let policy = cache_policy(req.uri().path());
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(policy));
    resp
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn index() -> Html<String> {
    Html(pages::modules_page(&[]))
}

async fn page2() -> Html<String> {
    Html(pages::page2())
}

async fn modules(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let urls = task::spawn_blocking(move || -> Result<Vec<String>, AppError> {
        if let Err(err) = state.files.clear_uploads() {
            warn!("modules page could not clear uploads: {}", err);
        }
        let records = state.metadata()?.list_all()?;
        Ok(records
            .iter()
            .map(|f| files::display_image_url(&f.filename))
            .collect())
    })
    .await??;
    Ok(Html(pages::modules_page(&urls)))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let records = task::spawn_blocking(move || -> Result<_, AppError> {
        let records = state.metadata()?.list_all()?;
        Ok(records)
    })
    .await??;
    Ok(Json(json!({ "files": records })))
}

struct UploadPart {
    filename: String,
    bytes: bytes::Bytes,
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Value>, AppError> {
    let start = Instant::now();
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        parts.push(UploadPart { filename, bytes });
    }

    if parts.is_empty() {
        return Err(AppError::Validation("No file part".to_string()));
    }
    for part in &parts {
        if part.filename.is_empty() {
            return Err(AppError::Validation("No selected file".to_string()));
        }
        files::checked_filename(&part.filename)?;
        if part.filename.chars().count() > MAX_FILENAME_LEN {
            return Err(AppError::Validation(format!(
                "Filename longer than {} characters: {}",
                MAX_FILENAME_LEN, part.filename
            )));
        }
    }

    let saved = task::spawn_blocking(move || -> Result<Vec<String>, AppError> {
        let mut names: Vec<String> = Vec::with_capacity(parts.len());
        for part in &parts {
            if !names.contains(&part.filename) {
                names.push(part.filename.clone());
            }
        }
        state.files.clear_uploads()?;
        for part in &parts {
            state.files.save(&part.filename, &part.bytes)?;
        }
        state.metadata()?.replace_all(&names)?;
        Ok(names)
    })
    .await??;

    info!(
        "upload files={} ms={}",
        saved.len(),
        start.elapsed().as_millis()
    );
    Ok(Json(json!({ "files": saved })))
}

#[derive(Deserialize)]
struct RemoveFileRequest {
    filename: Option<String>,
}

async fn remove_file(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RemoveFileRequest>,
) -> Result<Json<Value>, AppError> {
    let filename = req
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::Validation("filename is required".to_string()))?;
    task::spawn_blocking(move || -> Result<(), AppError> {
        state.files.remove(&filename)?;
        let rows = state.metadata()?.remove_one(&filename)?;
        info!("remove_file filename={} rows={}", filename, rows);
        Ok(())
    })
    .await??;
    Ok(Json(json!({ "success": true })))
}

async fn clear_files(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let removed = task::spawn_blocking(move || state.files.clear_uploads()).await??;
    info!("clear_files removed={}", removed);
    Ok(Json(json!({ "success": true })))
}

async fn check_files(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let empty = task::spawn_blocking(move || state.files.uploads_empty()).await??;
    if empty {
        return Err(AppError::Validation(analysis::NO_IMAGES_MESSAGE.to_string()));
    }
    Ok(Json(json!({ "message": "Files are present." })))
}

async fn analyze(
    State(state): State<AppState>,
    JsonBody(params): JsonBody<AnalysisParams>,
) -> Result<Json<analysis::AnalysisResult>, AppError> {
    let start = Instant::now();
    let result = task::spawn_blocking(move || {
        analysis::run_analysis(
            state.engine.as_ref(),
            state.files.upload_dir(),
            state.files.analyzed_dir(),
            &params,
        )
    })
    .await??;
    info!(
        "analyze images={} ms={}",
        result.names_dict.len(),
        start.elapsed().as_millis()
    );
    Ok(Json(result))
}

#[derive(Deserialize)]
struct IssueRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

async fn submit_issue(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<IssueRequest>,
) -> Result<Response, AppError> {
    state.issues.create_issue(&req.title, &req.body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Issue created successfully" })),
    )
        .into_response())
}

async fn get_issues(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(state.issues.list_issues().await?))
}

/// Run one analysis from the command line and print the result bundle.
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Directory holding one Winston-Lutz image set
    #[arg(long)]
    pub dir: PathBuf,
    /// Where annotated plots are written (wiped first)
    #[arg(long, default_value = "analyzedpngs")]
    pub plots: PathBuf,
    #[arg(long, default_value_t = 5.0)]
    pub bb_size: f64,
    #[arg(long, default_value_t = false)]
    pub low_density: bool,
    #[arg(long, default_value_t = analysis::DEFAULT_ANGLE_TOLERANCE)]
    pub tolerance: f64,
    #[arg(long, env = "WL_ENGINE_PROGRAM", default_value = "wl-engine")]
    pub engine_program: PathBuf,
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
}

pub fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let engine = CommandEngine::new(&args.engine_program, args.engine_args);
    let params = AnalysisParams {
        bb_size_mm: args.bb_size,
        low_density_bb: args.low_density,
        tolerance: Some(args.tolerance),
    };
    let result = analysis::run_analysis(&engine, &args.dir, &args.plots, &params)
        .with_context(|| format!("analyzing {}", args.dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_policy() {
        assert_eq!(cache_policy("/"), CACHE_PAGE);
        assert_eq!(cache_policy("/page2"), CACHE_PAGE);
        assert_eq!(cache_policy("/modules"), CACHE_PAGE);
        assert_eq!(cache_policy("/static/js/script.js"), CACHE_STATIC);
        assert_eq!(cache_policy("/static/images/display/a.png"), CACHE_STATIC);
        assert_eq!(
            cache_policy("/static/images/analyzedpngs/image1.png"),
            CACHE_DEFAULT
        );
        assert_eq!(
            cache_policy("/static/images/files_saved_here/a.dcm"),
            CACHE_DEFAULT
        );
        assert_eq!(
            cache_policy("/static/images/analyzedpngs_old/x.png"),
            CACHE_STATIC
        );
        assert_eq!(cache_policy("/analyze"), CACHE_DEFAULT);
        assert_eq!(cache_policy("/modules/extra"), CACHE_DEFAULT);
        assert_eq!(cache_policy("/staticfile"), CACHE_DEFAULT);
    }
}
