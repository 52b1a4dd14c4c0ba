use serde::Serialize;
use std::collections::HashMap;

/// Container of an encoded variant, as reported by the extractor's `ext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Container {
    #[serde(rename = "mp4")]
    Mp4,
    #[serde(rename = "m4a")]
    M4a,
    #[serde(rename = "webm")]
    Webm,
    #[serde(rename = "3gp")]
    ThreeGp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Mp4Like,
    WebmLike,
    AudioOnly,
}

impl Container {
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "mp4" => Some(Self::Mp4),
            "m4a" => Some(Self::M4a),
            "webm" => Some(Self::Webm),
            "3gp" => Some(Self::ThreeGp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::M4a => "m4a",
            Self::Webm => "webm",
            Self::ThreeGp => "3gp",
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::Mp4 | Self::ThreeGp => ContainerKind::Mp4Like,
            Self::Webm => ContainerKind::WebmLike,
            Self::M4a => ContainerKind::AudioOnly,
        }
    }

    /// mp4/m4a are preferred over webm when two variants share a quality tier.
    pub fn is_modern(&self) -> bool {
        matches!(self, Self::Mp4 | Self::M4a)
    }

    pub fn content_type(&self, kind: MediaKind) -> &'static str {
        match (self, self.kind(), kind) {
            (Self::ThreeGp, _, MediaKind::Video) => "video/3gpp",
            (Self::ThreeGp, _, MediaKind::Audio) => "audio/3gpp",
            (_, ContainerKind::WebmLike, MediaKind::Video) => "video/webm",
            (_, ContainerKind::WebmLike, MediaKind::Audio) => "audio/webm",
            (_, _, MediaKind::Video) => "video/mp4",
            (_, _, MediaKind::Audio) => "audio/mp4",
        }
    }
}

/// What the client asked to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

impl MediaKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// One encoded rendition of a source media item.
///
/// `quality_label` is set for variants carrying video, `audio_bitrate` for
/// audio-only ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaVariant {
    #[serde(rename = "itag")]
    pub stream_id: String,
    pub container: Container,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<u32>,
    pub has_audio: bool,
    pub has_video: bool,
    #[serde(
        rename = "contentLength",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_length"
    )]
    pub byte_length: Option<u64>,
}

fn serialize_length<S: serde::Serializer>(
    value: &Option<u64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(len) => serializer.collect_str(len),
        None => serializer.serialize_none(),
    }
}

/// Numeric counters travel as strings, the way the page reads them.
fn serialize_as_string<S: serde::Serializer>(
    value: &u64,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

impl MediaVariant {
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Video-only variants need a separate audio track muxed in.
    pub fn needs_remux(&self, kind: MediaKind) -> bool {
        kind == MediaKind::Video && self.has_video && !self.has_audio
    }
}

/// A variant together with what is needed to fetch it. Never sent to clients.
#[derive(Debug, Clone)]
pub struct SourceFormat {
    pub variant: MediaVariant,
    pub url: String,
    pub http_headers: HashMap<String, String>,
    /// Upstream throttles long unranged reads; fetch in ranges of this size.
    pub chunk_size: Option<u64>,
}

/// Everything the extractor knows about one source URL.
#[derive(Debug, Clone)]
pub struct SourceMedia {
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
    pub thumbnail_url: Option<String>,
    pub formats: Vec<SourceFormat>,
}

impl SourceMedia {
    pub fn find_format(&self, stream_id: &str) -> Option<&SourceFormat> {
        self.formats
            .iter()
            .find(|format| format.variant.stream_id == stream_id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatGroups {
    pub video_with_audio: Vec<MediaVariant>,
    /// Always empty: video-only variants are merged into `video_with_audio`.
    pub video_only: Vec<MediaVariant>,
    pub audio_only: Vec<MediaVariant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub title: String,
    #[serde(rename = "thumbnail")]
    pub thumbnail_url: Option<String>,
    pub author: String,
    #[serde(rename = "lengthSeconds", serialize_with = "serialize_as_string")]
    pub duration_seconds: u64,
    pub formats: FormatGroups,
}

/// Parameters of one download exchange.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: String,
    pub stream_id: String,
    pub kind: MediaKind,
}
