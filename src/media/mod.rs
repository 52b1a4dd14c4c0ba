mod error;
mod extractor;
mod fetcher;
mod formats;
mod remux;
mod types;
mod ytdlp;

pub use error::MediaError;
pub use extractor::Extractor;
pub use fetcher::{ByteStream, HttpStreamFetcher, StreamFetcher};
pub use formats::best_audio;
pub use remux::{FfmpegRemuxer, Remuxer};
pub use types::{DownloadRequest, MediaInfo, MediaKind, SourceMedia};
pub use ytdlp::YtDlpExtractor;

#[cfg(test)]
pub use fetcher::UpstreamStream;
#[cfg(test)]
pub use types::{Container, MediaVariant, SourceFormat};

use crate::config::ToolsConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Validates source links and turns extractor output into client-facing
/// format lists.
pub struct MediaResolver {
    extractor: Arc<dyn Extractor>,
}

impl MediaResolver {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        info!("Media resolver initialized with {}", extractor.name());
        Self { extractor }
    }

    pub fn is_supported_url(&self, url: &str) -> bool {
        self.extractor.validate_url(url)
    }

    /// Full extractor output, including the direct stream URLs.
    pub async fn source(&self, url: &str) -> Result<SourceMedia, MediaError> {
        if !self.is_supported_url(url) {
            return Err(MediaError::InvalidSource(url.to_string()));
        }

        info!("Resolving formats for URL: {}", url);
        self.extractor.extract(url).await
    }

    pub async fn resolve(&self, url: &str) -> Result<MediaInfo, MediaError> {
        let source = self.source(url).await?;
        let formats = formats::group_formats(&source.formats);

        if formats.video_with_audio.is_empty() && formats.audio_only.is_empty() {
            warn!("{} returned no usable formats for {}", self.extractor.name(), url);
        }

        Ok(MediaInfo {
            title: source.title,
            thumbnail_url: source.thumbnail_url,
            author: source.author,
            duration_seconds: source.duration_seconds,
            formats,
        })
    }

    pub async fn test_setup(tools: &ToolsConfig) -> anyhow::Result<()> {
        info!("Testing media tool setup...");

        let ytdlp_available = YtDlpExtractor::test_availability(&tools.ytdlp_path).await;
        let ffmpeg_available = FfmpegRemuxer::test_availability(&tools.ffmpeg_path).await;

        if ytdlp_available && !ffmpeg_available {
            warn!("⚠️  Formats without an audio track cannot be downloaded until ffmpeg is installed");
        }

        if ytdlp_available {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "yt-dlp is not available. Please install yt-dlp or set tools.ytdlp_path."
            ))
        }
    }
}
