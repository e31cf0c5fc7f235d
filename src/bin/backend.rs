use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use birdfetch::{
    cache::{self, ResultCache},
    coalesce::FlightGroup,
    config,
    cookies::CookieStore,
    extractor::{ExtractError, ExtractErrorKind, Extractor, is_valid_post_url, normalize_post_url},
    metadata::{self, VideoDetails},
    quality,
};
use clap::Parser;
use nix::unistd::Uid;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{signal, task};
use tower_http::cors::{Any, CorsLayer};

/// Known-public post used to probe whether uploaded cookies still work.
const COOKIE_PROBE_URL: &str = "https://x.com/jack/status/20";

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the birdfetch video metadata API.")]
struct Cli {
    #[arg(
        long,
        value_name = "PATH",
        help = "Config file to read (default /etc/birdfetch-env)"
    )]
    config: Option<PathBuf>,
    #[arg(long, value_name = "PORT", help = "Override the listen port")]
    port: Option<u16>,
    #[arg(long, value_name = "HOST", help = "Override the bind address")]
    host: Option<String>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Override the data directory holding cookies.txt"
    )]
    data_root: Option<PathBuf>,
    #[arg(long, value_name = "BIN", help = "Override the yt-dlp binary")]
    ytdlp_bin: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    cache: Arc<ResultCache<VideoDetails>>,
    flights: Arc<FlightGroup<VideoDetails, ExtractError>>,
    extractor: Arc<Extractor>,
    cookies: Arc<CookieStore>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        let status = match err.kind {
            ExtractErrorKind::NotFound | ExtractErrorKind::Unavailable => StatusCode::NOT_FOUND,
            ExtractErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            ExtractErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ExtractErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ExtractErrorKind::Unsupported => StatusCode::BAD_REQUEST,
            ExtractErrorKind::Backend => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct VideoRequest {
    url: String,
    #[serde(default)]
    is_adult_content: bool,
}

#[derive(Deserialize)]
struct CookiesUpload {
    cookies: Value,
}

#[derive(Deserialize)]
struct RawCookiesUpload {
    raw_cookies: String,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct TestParams {
    url: Option<String>,
    #[serde(default = "default_true")]
    adult: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ensure_not_root("birdfetch backend")?;

    let settings = match &cli.config {
        Some(path) => config::load_settings_from(path)?,
        None => config::load_settings()?,
    };
    let port = cli.port.unwrap_or(settings.fetch_port);
    let host = cli.host.unwrap_or(settings.fetch_host);
    let data_root = cli.data_root.unwrap_or(settings.data_root);
    let ytdlp_bin = cli.ytdlp_bin.unwrap_or(settings.ytdlp_bin);

    let extractor = Extractor::new(&ytdlp_bin);
    extractor
        .ensure_available()
        .with_context(|| format!("checking for {}", ytdlp_bin.display()))?;

    let cache = Arc::new(ResultCache::new());
    let cookies = Arc::new(CookieStore::new(&data_root));
    {
        // Credential changes flip what restricted posts resolve to; drop
        // everything fetched under the old cookie state.
        let cache = Arc::clone(&cache);
        cookies.on_change(move || cache.invalidate_all());
    }

    let state = AppState {
        cache,
        flights: Arc::new(FlightGroup::new()),
        extractor: Arc::new(extractor),
        cookies,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(service_info))
        .route("/video/fetch", post(fetch_video))
        .route("/test", get(test_fetch))
        .route("/auth/cookies", post(upload_cookies).delete(clear_cookies))
        .route("/auth/status", get(auth_status))
        .route("/cookies/add-raw", post(add_raw_cookies))
        .route("/cookies/status", get(cookies_status))
        .route("/cookies/validate", post(validate_cookies))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::new(host.parse().context("parsing bind address")?, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("birdfetch API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// The service runs under a dedicated unprivileged account; refuse to start
/// with root privileges so manual invocations do not revert to insecure
/// defaults.
fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; use the birdfetch service account");
    }
    Ok(())
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "birdfetch video metadata API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "fetch_video": "POST /video/fetch {url, is_adult_content}",
            "test": "GET /test?url=...&adult=true",
            "upload_cookies": "POST /auth/cookies",
            "clear_cookies": "DELETE /auth/cookies",
            "auth_status": "GET /auth/status",
            "add_raw_cookies": "POST /cookies/add-raw",
            "cookies_status": "GET /cookies/status",
            "validate_cookies": "POST /cookies/validate",
            "cache_stats": "GET /cache/stats",
            "clear_cache": "POST /cache/clear",
        },
    }))
}

async fn fetch_video(
    State(state): State<AppState>,
    Json(request): Json<VideoRequest>,
) -> ApiResult<Json<VideoDetails>> {
    let details = state
        .fetch_video(&request.url, request.is_adult_content)
        .await?;
    Ok(Json(details))
}

async fn test_fetch(
    State(state): State<AppState>,
    Query(params): Query<TestParams>,
) -> ApiResult<Json<Value>> {
    let Some(url) = params.url else {
        return Err(ApiError::bad_request(
            "Missing url parameter; try /test?url=https://x.com/user/status/123",
        ));
    };

    let details = state.fetch_video(&url, params.adult).await?;
    Ok(Json(json!({
        "status": "success",
        "title": details.title,
        "duration": details.duration_formatted,
        "quality": details.quality,
        "uploader": details.uploader,
        "content_rating": details.content_rating,
        "format": details.format,
        "filename": details.filename,
        "download_url": details.download_url,
        "thumbnail": details.thumbnail,
        "file_size": details.file_size,
        "expires_at": details.expires_at,
    })))
}

async fn upload_cookies(
    State(state): State<AppState>,
    Json(request): Json<CookiesUpload>,
) -> ApiResult<Json<Value>> {
    if request.cookies.as_array().is_some_and(|list| list.is_empty()) {
        return Err(ApiError::bad_request("No cookies provided"));
    }

    let cookies = Arc::clone(&state.cookies);
    let count = run_blocking(move || cookies.replace_from_json(&request.cookies)).await?;
    if count == 0 {
        return Err(ApiError::bad_request("No usable cookies provided"));
    }

    Ok(Json(json!({
        "message": format!(
            "Cookies uploaded successfully ({count} entries). You can now access private/restricted content."
        ),
    })))
}

async fn clear_cookies(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cookies = Arc::clone(&state.cookies);
    run_blocking(move || cookies.clear()).await?;
    Ok(Json(json!({ "message": "Cookies cleared successfully" })))
}

async fn auth_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cookies = Arc::clone(&state.cookies);
    let (authenticated, cookie_count) =
        run_blocking(move || Ok((cookies.cookie_file().is_some(), cookies.count()))).await?;

    Ok(Json(json!({
        "authenticated": authenticated,
        "cookie_count": cookie_count,
        "status": if authenticated {
            "Ready for private content"
        } else {
            "Upload cookies to access private content"
        },
    })))
}

async fn add_raw_cookies(
    State(state): State<AppState>,
    Json(request): Json<RawCookiesUpload>,
) -> ApiResult<Json<Value>> {
    let payload: Value = serde_json::from_str(&request.raw_cookies)
        .map_err(|_| ApiError::bad_request("Invalid JSON format"))?;

    let cookies = Arc::clone(&state.cookies);
    let count = run_blocking(move || cookies.replace_from_json(&payload)).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully converted {count} cookies to Netscape format"),
        "cookies_count": count,
    })))
}

async fn cookies_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cookies = Arc::clone(&state.cookies);
    let count = run_blocking(move || Ok(cookies.count())).await?;

    if count == 0 {
        return Ok(Json(json!({
            "success": false,
            "message": "No cookies file found",
            "cookies_count": 0,
        })));
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Cookies file exists with {count} entries"),
        "cookies_count": count,
    })))
}

async fn validate_cookies(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let Some(cookie_file) = state.cookies.cookie_file() else {
        return Ok(Json(json!({
            "success": false,
            "message": "No cookies file found. Please add cookies first.",
        })));
    };

    let (success, message) = match state.extractor.fetch(COOKIE_PROBE_URL, Some(cookie_file)).await
    {
        Ok(_) => (true, "Cookies are valid and working!"),
        Err(err) => match err.kind {
            ExtractErrorKind::Unauthorized => (
                false,
                "Cookies are invalid or expired. Please update your cookies.",
            ),
            ExtractErrorKind::AccessDenied => (
                false,
                "Cookies are loaded but may not have sufficient permissions for private content",
            ),
            _ => (
                true,
                "Cookies are loaded (validation inconclusive but likely working)",
            ),
        },
    };

    Ok(Json(json!({ "success": success, "message": message })))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "cache_size": state.cache.len(),
        "cache_enabled": true,
    }))
}

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let removed = state.cache.len();
    state.cache.invalidate_all();
    Json(json!({
        "message": format!("Cache cleared. Removed {removed} entries."),
    }))
}

impl AppState {
    /// The fetch pipeline: normalize and validate the URL, consult the
    /// cache, and otherwise coalesce onto one extraction per key.
    async fn fetch_video(&self, raw_url: &str, sensitive: bool) -> ApiResult<VideoDetails> {
        let url = normalize_post_url(raw_url);
        if !is_valid_post_url(&url) {
            return Err(ApiError::bad_request(
                "Please provide a valid Twitter/X URL (e.g., https://x.com/user/status/123...)",
            ));
        }

        let key = cache::request_key(&url, sensitive);
        if let Some(hit) = self.cache.get(&key) {
            println!("Returning cached result for {url}");
            return Ok(hit);
        }

        let details = self
            .flights
            .run(&key, || {
                let state = self.clone();
                let key = key.clone();
                let url = url.clone();
                async move { state.extract_and_cache(&key, &url, sensitive).await }
            })
            .await?;
        Ok(details)
    }

    /// Runs on the flight leader only. A successful result is cached; any
    /// failure (or cancellation) leaves the cache untouched.
    async fn extract_and_cache(
        &self,
        key: &str,
        url: &str,
        sensitive: bool,
    ) -> Result<VideoDetails, ExtractError> {
        // A previous leader may have finished between our cache miss and
        // flight election; serve its result instead of refetching.
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit);
        }

        println!("Extracting video data for {url}");
        let cookie_file = if sensitive {
            let file = self.cookies.cookie_file();
            if file.is_some() {
                println!("Using cookies for restricted content");
            }
            file
        } else {
            None
        };

        let info = self.extractor.fetch(url, cookie_file).await?;
        let selection = quality::select(&info.formats, "mp4");
        println!(
            "{} formats found, {} matched mp4",
            info.formats.len(),
            selection.ranked.len()
        );

        let details = metadata::build_video_details(&info, selection, sensitive)?;
        self.cache.set(key, details.clone());
        Ok(details)
    }
}

/// Bridges blocking cookie-file work onto the blocking pool, mirroring how
/// extraction runs off the server threads.
async fn run_blocking<T, F>(task_fn: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(task_fn)
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(|err| ApiError::internal(err.to_string()))
}
