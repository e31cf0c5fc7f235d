//! Assembly of the API-facing video record.
//!
//! All structs in this module mirror what the HTTP surface serializes to
//! clients. The extractor hands over a loosely-typed payload; this is where
//! defaults are filled in, dates and durations become human-readable, and
//! the selected best rendition is folded into one record.

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::extractor::{ExtractError, ExtractErrorKind, VideoInfo};
use crate::quality::{self, RankedFormat, Selection};

/// Upstream download URLs typically stay valid for about six hours.
pub const DOWNLOAD_URL_LIFETIME_SECS: i64 = 6 * 3600;

/// Complete fetch result for one post: pass-through metadata plus the
/// selected best MP4 and the full ranked quality list. This is the record
/// stored in the result cache and returned verbatim on hits.
#[derive(Debug, Clone, Serialize)]
pub struct VideoDetails {
    pub success: bool,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,
    pub duration: i64,
    pub duration_formatted: String,
    pub uploader: String,
    pub upload_date: String,
    pub upload_date_formatted: String,
    pub view_count: i64,
    pub like_count: i64,
    pub repost_count: i64,
    pub download_url: String,
    pub filename: String,
    pub format: String,
    pub quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    pub content_rating: String,
    pub expires_at: i64,
    pub available_qualities: Vec<RankedFormat>,
    pub total_formats_found: usize,
    pub mp4_formats_found: usize,
}

/// Folds the extractor payload and the quality selection into the response
/// record. Fails only when no usable rendition (or no download URL on the
/// winner) exists; missing metadata fields fall back to defaults.
pub fn build_video_details(
    info: &VideoInfo,
    selection: Selection<'_>,
    sensitive: bool,
) -> Result<VideoDetails, ExtractError> {
    let Some(best) = selection.best else {
        return Err(ExtractError {
            kind: ExtractErrorKind::Unavailable,
            message: "No MP4 video formats available".to_owned(),
        });
    };

    let download_url = match best.url.as_deref() {
        Some(url) if !url.is_empty() => url.to_owned(),
        _ => {
            return Err(ExtractError {
                kind: ExtractErrorKind::Unavailable,
                message: "Could not extract download URL".to_owned(),
            });
        }
    };

    let title = info
        .fulltitle
        .as_deref()
        .or(info.title.as_deref())
        .filter(|title| !title.is_empty())
        .unwrap_or("Unknown Video")
        .to_owned();

    let uploader = info
        .uploader
        .as_deref()
        .or(info.channel.as_deref())
        .filter(|uploader| !uploader.is_empty())
        .unwrap_or("Unknown")
        .to_owned();

    let duration = info.duration.unwrap_or(0.0) as i64;
    let upload_date = info.upload_date.clone().unwrap_or_default();

    let quality = best
        .format_note
        .as_deref()
        .filter(|note| !note.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| quality::quality_label(best.height));

    let ranked = selection.ranked;
    let mp4_formats_found = ranked.len();

    Ok(VideoDetails {
        success: true,
        title: title.clone(),
        description: info.description.clone().unwrap_or_default(),
        thumbnail: info.thumbnail.clone().unwrap_or_default(),
        duration,
        duration_formatted: format_duration(duration),
        uploader,
        upload_date_formatted: format_upload_date(&upload_date),
        upload_date,
        view_count: info.view_count.unwrap_or(0),
        like_count: info.like_count.unwrap_or(0),
        repost_count: info.repost_count.unwrap_or(0),
        download_url,
        filename: sanitize_filename(&title),
        format: best.ext.clone().unwrap_or_else(|| "mp4".to_owned()),
        quality,
        file_size: best.filesize.or(best.filesize_approx),
        content_rating: content_rating(sensitive).to_owned(),
        expires_at: Utc::now().timestamp() + DOWNLOAD_URL_LIFETIME_SECS,
        available_qualities: ranked,
        total_formats_found: info.formats.len(),
        mp4_formats_found,
    })
}

pub fn content_rating(sensitive: bool) -> &'static str {
    if sensitive { "Adult (18+)" } else { "General Audience" }
}

/// "M:SS" under an hour, "H:MM:SS" above, "Unknown" when absent.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "Unknown".to_owned();
    }
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Converts yt-dlp's `YYYYMMDD` upload date into ISO-8601, or "Unknown".
pub fn format_upload_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw, "%Y%m%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => "Unknown".to_owned(),
    }
}

/// Builds a safe `.mp4` filename from the post title: filesystem-reserved
/// characters become underscores, non-ASCII is dropped, and the stem is
/// capped at 100 characters.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .take(100)
        .collect();

    let stem = cleaned.trim();
    if stem.is_empty() {
        format!("twitter_video_{}.mp4", Utc::now().timestamp())
    } else {
        format!("{stem}.mp4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FormatInfo;
    use crate::quality::select;

    fn sample_info() -> VideoInfo {
        VideoInfo {
            id: Some("1672884416430096384".into()),
            title: Some("Sample Title".into()),
            fulltitle: Some("Sample Full Title".into()),
            description: Some("desc".into()),
            uploader: Some("someone".into()),
            channel: None,
            duration: Some(125.7),
            upload_date: Some("20240101".into()),
            view_count: Some(10),
            like_count: Some(3),
            repost_count: Some(1),
            thumbnail: Some("https://img/1.jpg".into()),
            formats: vec![
                FormatInfo {
                    ext: Some("mp4".into()),
                    vcodec: Some("avc1".into()),
                    height: Some(1080),
                    tbr: Some(2048.0),
                    filesize: Some(15_728_640),
                    url: Some("https://video/1080.mp4".into()),
                    ..FormatInfo::default()
                },
                FormatInfo {
                    ext: Some("m3u8".into()),
                    vcodec: Some("avc1".into()),
                    height: Some(720),
                    url: Some("https://video/pl.m3u8".into()),
                    ..FormatInfo::default()
                },
            ],
        }
    }

    #[test]
    fn build_folds_best_pick_and_metadata_together() {
        let info = sample_info();
        let details = build_video_details(&info, select(&info.formats, "mp4"), false).unwrap();

        assert!(details.success);
        assert_eq!(details.title, "Sample Full Title");
        assert_eq!(details.download_url, "https://video/1080.mp4");
        assert_eq!(details.quality, "1080p");
        assert_eq!(details.duration, 125);
        assert_eq!(details.duration_formatted, "2:05");
        assert_eq!(details.upload_date_formatted, "2024-01-01");
        assert_eq!(details.filename, "Sample Full Title.mp4");
        assert_eq!(details.file_size, Some(15_728_640));
        assert_eq!(details.content_rating, "General Audience");
        assert_eq!(details.total_formats_found, 2);
        assert_eq!(details.mp4_formats_found, 1);
        assert!(details.expires_at > Utc::now().timestamp());
    }

    #[test]
    fn build_without_mp4_renditions_reports_unavailable() {
        let mut info = sample_info();
        info.formats.remove(0);
        let err = build_video_details(&info, select(&info.formats, "mp4"), false).unwrap_err();
        assert_eq!(err.kind, ExtractErrorKind::Unavailable);
    }

    #[test]
    fn build_without_a_download_url_fails() {
        let mut info = sample_info();
        info.formats[0].url = None;
        let err = build_video_details(&info, select(&info.formats, "mp4"), false).unwrap_err();
        assert_eq!(err.message, "Could not extract download URL");
    }

    #[test]
    fn sensitive_requests_get_the_adult_rating() {
        let info = sample_info();
        let details = build_video_details(&info, select(&info.formats, "mp4"), true).unwrap();
        assert_eq!(details.content_rating, "Adult (18+)");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "Unknown");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(125), "2:05");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn upload_date_formatting() {
        assert_eq!(format_upload_date("20240101"), "2024-01-01");
        assert_eq!(format_upload_date(""), "Unknown");
        assert_eq!(format_upload_date("2024-01-01"), "Unknown");
        assert_eq!(format_upload_date("20241301"), "Unknown");
    }

    #[test]
    fn filenames_drop_reserved_and_non_ascii_characters() {
        assert_eq!(
            sanitize_filename("What? A/B <test>"),
            "What_ A_B _test_.mp4"
        );
        assert_eq!(sanitize_filename("café"), "caf.mp4");
        let long = "a".repeat(150);
        assert_eq!(sanitize_filename(&long).len(), 104);
    }

    #[test]
    fn all_unicode_titles_fall_back_to_a_generated_name() {
        let filename = sanitize_filename("動画タイトル");
        assert!(filename.starts_with("twitter_video_"));
        assert!(filename.ends_with(".mp4"));
    }
}
