//! Bridge to the external yt-dlp extractor.
//!
//! All platform parsing is delegated to yt-dlp; this module builds the
//! command line, deserializes its JSON payload, and classifies failures into
//! something the HTTP layer can map onto a status code. The blocking child
//! process runs under `spawn_blocking` so the server threads stay free.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::task;
use url::Url;

/// Full `yt-dlp --dump-single-json` payload. Only a subset of fields are
/// read but everything is left optional because posts may lack metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub upload_date: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

/// One candidate encoding of the video as reported by yt-dlp.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
    pub vbr: Option<f64>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<i64>,
    #[serde(rename = "filesize_approx")]
    pub filesize_approx: Option<i64>,
    pub url: Option<String>,
}

/// Broad failure categories reported by the extractor, derived from yt-dlp's
/// stderr. The HTTP layer maps these onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractErrorKind {
    NotFound,
    AccessDenied,
    Unauthorized,
    RateLimited,
    Unsupported,
    Unavailable,
    Backend,
}

/// Classified extraction failure. Cloneable so every waiter coalesced onto
/// one in-flight fetch can receive the same outcome.
#[derive(Debug, Clone)]
pub struct ExtractError {
    pub kind: ExtractErrorKind,
    pub message: String,
}

impl ExtractError {
    fn backend(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractErrorKind::Backend,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExtractError {}

/// Handle on the yt-dlp binary. The path is configurable so deployments can
/// pin a managed copy and tests can point at a stub.
#[derive(Debug, Clone)]
pub struct Extractor {
    binary: PathBuf,
}

impl Extractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs `<binary> --version` to fail loudly at startup when yt-dlp is
    /// missing instead of on the first request.
    pub fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .arg("--version")
            .output()
            .with_context(|| format!("running {} --version", self.binary.display()))?
            .status;
        if !status.success() {
            bail!("{} --version exited with {}", self.binary.display(), status);
        }
        Ok(())
    }

    /// Fetches metadata and the format list for `url`, passing `--cookies`
    /// when a credential file is supplied for restricted content.
    pub async fn fetch(
        &self,
        url: &str,
        cookie_file: Option<PathBuf>,
    ) -> Result<VideoInfo, ExtractError> {
        let binary = self.binary.clone();
        let url = url.to_owned();
        match task::spawn_blocking(move || run_ytdlp(&binary, &url, cookie_file.as_deref())).await
        {
            Ok(outcome) => outcome,
            Err(err) => Err(ExtractError::backend(format!(
                "extraction task failed: {err}"
            ))),
        }
    }
}

fn run_ytdlp(
    binary: &Path,
    url: &str,
    cookie_file: Option<&Path>,
) -> Result<VideoInfo, ExtractError> {
    let mut command = Command::new(binary);
    command
        .arg("--dump-single-json")
        .arg("--skip-download")
        .arg("--no-warnings")
        .arg("--no-progress")
        .arg("--no-playlist")
        .arg(url);

    if let Some(cookies) = cookie_file {
        command.arg("--cookies").arg(cookies);
    }

    let output = command.output().map_err(|err| {
        ExtractError::backend(format!("launching {} failed: {err}", binary.display()))
    })?;

    if !output.status.success() {
        return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|err| ExtractError::backend(format!("deserializing metadata JSON: {err}")))
}

/// Maps yt-dlp's stderr onto an error category with an operator-friendly
/// message. Unrecognized output is passed through as a backend failure.
fn classify_failure(stderr: &str) -> ExtractError {
    let lower = stderr.to_lowercase();

    let (kind, message): (ExtractErrorKind, &str) = if stderr.contains("HTTP Error 404")
        || stderr.contains("Not Found")
    {
        (
            ExtractErrorKind::NotFound,
            "Tweet not found. The tweet may have been deleted, the account is private, or the tweet doesn't contain a video.",
        )
    } else if stderr.contains("HTTP Error 403") || stderr.contains("Forbidden") {
        (
            ExtractErrorKind::AccessDenied,
            "Access forbidden. Cannot access private accounts or restricted content. Try uploading cookies.",
        )
    } else if stderr.contains("HTTP Error 429") || stderr.contains("Too Many Requests") {
        (
            ExtractErrorKind::RateLimited,
            "Rate limit exceeded. Please wait a few minutes before trying again.",
        )
    } else if stderr.contains("HTTP Error 401") || stderr.contains("Unauthorized") {
        (
            ExtractErrorKind::Unauthorized,
            "Unauthorized access. Upload cookies to access private/restricted content.",
        )
    } else if stderr.contains("Unsupported URL") {
        (
            ExtractErrorKind::Unsupported,
            "This Twitter/X URL is not supported. Please make sure the tweet contains a video.",
        )
    } else if stderr.contains("Video unavailable") {
        (
            ExtractErrorKind::Unavailable,
            "Video is unavailable. It might be private, deleted, or from a protected account.",
        )
    } else if stderr.contains("Unable to extract") || stderr.contains("Could not extract") {
        (
            ExtractErrorKind::Unavailable,
            "Unable to extract video. The tweet might not contain a video or might be restricted.",
        )
    } else if lower.contains("network") || lower.contains("connection") {
        (
            ExtractErrorKind::Backend,
            "Network connection error. Please check your internet connection and try again.",
        )
    } else {
        let trimmed = stderr.trim();
        return ExtractError::backend(if trimmed.is_empty() {
            "extraction failed with no error output".to_owned()
        } else {
            trimmed.to_owned()
        });
    };

    ExtractError {
        kind,
        message: message.to_owned(),
    }
}

/// Normalizes a post URL: trims whitespace and maps twitter.com hosts onto
/// x.com so equivalent links share one cache entry.
pub fn normalize_post_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_owned();
    };

    let mapped = matches!(
        parsed.host_str(),
        Some("twitter.com" | "www.twitter.com" | "mobile.twitter.com" | "www.x.com" | "mobile.x.com")
    );
    if mapped && parsed.set_host(Some("x.com")).is_err() {
        return trimmed.to_owned();
    }

    parsed.to_string()
}

/// A valid post URL points at x.com or twitter.com and carries a
/// `/status/<digits>` path under some account segment.
pub fn is_valid_post_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    if !matches!(
        parsed.host_str(),
        Some("x.com" | "www.x.com" | "twitter.com" | "www.twitter.com")
    ) {
        return false;
    }

    let Some(segments) = parsed.path_segments() else {
        return false;
    };
    let segments: Vec<&str> = segments.collect();
    segments.windows(2).enumerate().any(|(index, window)| {
        index >= 1
            && window[0] == "status"
            && !window[1].is_empty()
            && window[1].chars().all(|c| c.is_ascii_digit())
    })
}
