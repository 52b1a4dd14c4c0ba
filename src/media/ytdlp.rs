use super::{
    error::MediaError,
    extractor::Extractor,
    types::{Container, MediaVariant, SourceFormat, SourceMedia},
};
use crate::config::ToolsConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

const VIDEO_ID_LEN: usize = 11;

pub struct YtDlpExtractor {
    binary: String,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            binary: tools.ytdlp_path.clone(),
            timeout: tools.extract_timeout(),
        }
    }

    pub async fn test_availability(binary: &str) -> bool {
        match Command::new(binary).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn validate_url(&self, url: &str) -> bool {
        extract_video_id(url).is_some()
    }

    async fn extract(&self, url: &str) -> Result<SourceMedia, MediaError> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--no-warnings")
                .arg("--no-playlist")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| MediaError::UpstreamFailure("metadata extraction timed out".to_string()))?
        .map_err(|e| MediaError::UpstreamFailure(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::UpstreamFailure(format!(
                "metadata extraction failed: {}",
                error.trim()
            )));
        }

        let json: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            MediaError::UpstreamFailure(format!("failed to parse media metadata: {e}"))
        })?;

        let media = parse_media(&json);
        info!(
            "Extracted {} fetchable formats for \"{}\"",
            media.formats.len(),
            media.title
        );
        Ok(media)
    }
}

/// Returns the 11-character video id when the URL points at a single video.
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let candidate = match host {
        "youtu.be" => segments.first().map(|s| s.to_string()),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
            match segments.as_slice() {
                ["watch"] => parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.to_string()),
                ["shorts" | "embed" | "live" | "v", id, ..] => Some(id.to_string()),
                _ => None,
            }
        }
        _ => None,
    }?;

    is_valid_video_id(&candidate).then_some(candidate)
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_media(json: &Value) -> SourceMedia {
    let formats = json["formats"]
        .as_array()
        .map(|formats| formats.iter().filter_map(parse_format).collect())
        .unwrap_or_default();

    SourceMedia {
        title: json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string(),
        author: json["uploader"]
            .as_str()
            .or(json["channel"].as_str())
            .unwrap_or("Unknown")
            .to_string(),
        duration_seconds: json["duration"].as_f64().map(|d| d as u64).unwrap_or(0),
        thumbnail_url: json["thumbnail"].as_str().map(|s| s.to_string()),
        formats,
    }
}

fn codec_present(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|codec| !codec.is_empty() && codec != "none")
}

fn parse_format(format: &Value) -> Option<SourceFormat> {
    // Manifest-based formats (HLS/DASH) cannot be streamed as a single body.
    let protocol = format["protocol"].as_str().unwrap_or("https");
    if !matches!(protocol, "https" | "http") {
        return None;
    }

    let url = format["url"].as_str()?.to_string();
    let stream_id = format["format_id"].as_str()?.to_string();
    let container = Container::from_ext(format["ext"].as_str()?)?;

    let has_video = codec_present(&format["vcodec"]);
    let has_audio = codec_present(&format["acodec"]);
    if !has_video && !has_audio {
        return None;
    }

    let quality_label = if has_video {
        format["height"].as_u64().map(|height| {
            match format["fps"].as_f64().map(|fps| fps.round() as u64) {
                Some(fps) if fps > 30 => format!("{height}p{fps}"),
                _ => format!("{height}p"),
            }
        })
    } else {
        None
    };

    let audio_bitrate = if has_video {
        None
    } else {
        format["abr"]
            .as_f64()
            .filter(|abr| *abr > 0.0)
            .map(|abr| abr.round() as u32)
    };

    let http_headers = format["http_headers"]
        .as_object()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_else(HashMap::new);

    Some(SourceFormat {
        variant: MediaVariant {
            stream_id,
            container,
            quality_label,
            audio_bitrate,
            has_audio,
            has_video,
            byte_length: format["filesize"].as_u64(),
        },
        url,
        http_headers,
        chunk_size: format["downloader_options"]["http_chunk_size"]
            .as_u64()
            .filter(|size| *size > 0),
    })
}
