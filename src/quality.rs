//! Rendition ranking for extracted format lists.
//!
//! yt-dlp reports every encoding it can see for a post, from audio-only
//! streams to HLS manifests. This module reduces that list to the MP4
//! renditions a client can download directly, ordered best-first, and labels
//! each one for display.

use std::cmp::Ordering;

use serde::Serialize;

use crate::extractor::FormatInfo;

/// One entry of the ranked quality list exposed to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFormat {
    pub quality: String,
    pub bitrate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<i64>,
    pub url: String,
}

/// Result of ranking a format list against a target container.
///
/// `best` borrows the winning descriptor so callers can read fields the
/// ranked summary drops (codec, format note, approximate size). An empty
/// `ranked` with `best == None` means the post simply has no matching
/// renditions; that is a normal outcome, not a failure.
#[derive(Debug)]
pub struct Selection<'a> {
    pub best: Option<&'a FormatInfo>,
    pub ranked: Vec<RankedFormat>,
}

/// Filters `formats` to `target_ext` video renditions and ranks them by
/// resolution height, then total bitrate, then video bitrate, then frame
/// rate, all descending. Unknown fields rank lowest. The sort is stable, so
/// descriptors with identical keys keep their input order.
pub fn select<'a>(formats: &'a [FormatInfo], target_ext: &str) -> Selection<'a> {
    let mut matched: Vec<&FormatInfo> = formats
        .iter()
        .filter(|fmt| {
            fmt.ext
                .as_deref()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(target_ext))
                && fmt.vcodec.as_deref().is_some_and(|codec| codec != "none")
        })
        .collect();

    matched.sort_by(|a, b| compare_quality(b, a));

    let ranked = matched
        .iter()
        .map(|fmt| RankedFormat {
            quality: quality_label(fmt.height),
            bitrate: bitrate_label(fmt.tbr),
            filesize: fmt.filesize.or(fmt.filesize_approx),
            url: fmt.url.clone().unwrap_or_default(),
        })
        .collect();

    Selection {
        best: matched.first().copied(),
        ranked,
    }
}

fn compare_quality(a: &FormatInfo, b: &FormatInfo) -> Ordering {
    a.height
        .unwrap_or(0)
        .cmp(&b.height.unwrap_or(0))
        .then(a.tbr.unwrap_or(0.0).total_cmp(&b.tbr.unwrap_or(0.0)))
        .then(a.vbr.unwrap_or(0.0).total_cmp(&b.vbr.unwrap_or(0.0)))
        .then(a.fps.unwrap_or(0.0).total_cmp(&b.fps.unwrap_or(0.0)))
}

/// "1080p" style label, or "unknown" when the height is missing.
pub fn quality_label(height: Option<i64>) -> String {
    match height {
        Some(height) if height > 0 => format!("{height}p"),
        _ => "unknown".to_owned(),
    }
}

/// "2048kbps" style label rounded to whole kbps, or "unknown" when the
/// bitrate is missing. Never "0kbps".
pub fn bitrate_label(tbr: Option<f64>) -> String {
    match tbr {
        Some(tbr) if tbr > 0.0 => format!("{}kbps", tbr.round() as i64),
        _ => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(ext: &str, height: Option<i64>, tbr: Option<f64>, url: &str) -> FormatInfo {
        FormatInfo {
            ext: Some(ext.into()),
            height,
            tbr,
            url: Some(url.into()),
            vcodec: Some("avc1".into()),
            ..FormatInfo::default()
        }
    }

    #[test]
    fn picks_highest_resolution_and_excludes_other_containers() {
        let formats = vec![
            fmt("mp4", Some(720), Some(1280.0), "https://v/720.mp4"),
            fmt("mp4", Some(1080), Some(2048.0), "https://v/1080.mp4"),
            fmt("webm", Some(1080), Some(3000.0), "https://v/1080.webm"),
        ];

        let selection = select(&formats, "mp4");
        let best = selection.best.unwrap();
        assert_eq!(best.height, Some(1080));
        assert_eq!(best.url.as_deref(), Some("https://v/1080.mp4"));

        let labels: Vec<&str> = selection
            .ranked
            .iter()
            .map(|entry| entry.quality.as_str())
            .collect();
        assert_eq!(labels, vec!["1080p", "720p"]);
        assert_eq!(selection.ranked[0].bitrate, "2048kbps");
    }

    #[test]
    fn no_matching_container_is_a_normal_empty_outcome() {
        let formats = vec![fmt("webm", Some(1080), Some(3000.0), "https://v/1080.webm")];
        let selection = select(&formats, "mp4");
        assert!(selection.best.is_none());
        assert!(selection.ranked.is_empty());
    }

    #[test]
    fn unknown_fields_rank_lowest_and_label_as_unknown() {
        let formats = vec![fmt("mp4", None, None, "https://v/mystery.mp4")];
        let selection = select(&formats, "mp4");
        let only = &selection.ranked[0];
        assert_eq!(only.quality, "unknown");
        assert_eq!(only.bitrate, "unknown");
        assert_eq!(
            selection.best.unwrap().url.as_deref(),
            Some("https://v/mystery.mp4")
        );
    }

    #[test]
    fn identical_keys_keep_input_order() {
        let formats = vec![
            fmt("mp4", Some(720), Some(1000.0), "https://v/first.mp4"),
            fmt("mp4", Some(720), Some(1000.0), "https://v/second.mp4"),
        ];
        let selection = select(&formats, "mp4");
        assert_eq!(selection.ranked[0].url, "https://v/first.mp4");
        assert_eq!(selection.ranked[1].url, "https://v/second.mp4");
    }

    #[test]
    fn best_is_never_shorter_than_any_other_match() {
        let formats = vec![
            fmt("mp4", Some(360), Some(700.0), "a"),
            fmt("mp4", None, Some(9000.0), "b"),
            fmt("mp4", Some(1080), None, "c"),
            fmt("mp4", Some(480), Some(800.0), "d"),
        ];
        let selection = select(&formats, "mp4");
        let best_height = selection.best.unwrap().height.unwrap_or(0);
        for candidate in &formats {
            assert!(best_height >= candidate.height.unwrap_or(0));
        }
    }

    #[test]
    fn bitrate_breaks_resolution_ties() {
        let formats = vec![
            fmt("mp4", Some(720), Some(900.0), "https://v/slow.mp4"),
            fmt("mp4", Some(720), Some(1400.0), "https://v/fast.mp4"),
        ];
        let selection = select(&formats, "mp4");
        assert_eq!(
            selection.best.unwrap().url.as_deref(),
            Some("https://v/fast.mp4")
        );
    }

    #[test]
    fn container_match_is_case_insensitive() {
        let formats = vec![fmt("MP4", Some(480), Some(600.0), "https://v/480.mp4")];
        let selection = select(&formats, "mp4");
        assert!(selection.best.is_some());
    }

    #[test]
    fn audio_only_formats_are_excluded() {
        let mut audio = fmt("mp4", None, Some(128.0), "https://v/audio.m4a");
        audio.vcodec = Some("none".into());
        let formats = vec![audio];
        let selection = select(&formats, "mp4");
        assert!(selection.best.is_none());
    }

    #[test]
    fn bitrate_label_rounds_to_whole_kbps() {
        assert_eq!(bitrate_label(Some(2047.6)), "2048kbps");
        assert_eq!(bitrate_label(Some(2047.4)), "2047kbps");
        assert_eq!(bitrate_label(None), "unknown");
    }
}
