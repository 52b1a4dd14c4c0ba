use super::{
    error::{ApiError, ApiResult, DOWNLOAD_FAILED, INFO_FAILED, INVALID_PARAMETERS, INVALID_URL},
    AppState,
};
use crate::{
    media::{best_audio, ByteStream, DownloadRequest, MediaError, MediaInfo, MediaKind, MediaResolver},
    utils::attachment_filename,
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, Response},
    Json,
};
use futures::{stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Default, Deserialize)]
pub struct InfoParams {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
    pub itag: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl DownloadParams {
    fn into_request(self, resolver: &MediaResolver) -> ApiResult<DownloadRequest> {
        let url = self.url.filter(|url| !url.trim().is_empty());
        let itag = self.itag.filter(|itag| !itag.trim().is_empty());
        let kind = match self.kind.as_deref() {
            None | Some("") => Some(MediaKind::Video),
            Some(kind) => MediaKind::parse(kind),
        };

        match (url, itag, kind) {
            (Some(url), Some(itag), Some(kind)) if resolver.is_supported_url(&url) => {
                Ok(DownloadRequest {
                    source_url: url,
                    stream_id: itag,
                    kind,
                })
            }
            _ => Err(ApiError::bad_request(INVALID_PARAMETERS)),
        }
    }
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn info(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> ApiResult<Json<MediaInfo>> {
    let url = params
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(INVALID_URL))?;

    let info = state
        .resolver
        .resolve(&url)
        .await
        .map_err(|e| ApiError::from_media(e, INVALID_URL, INFO_FAILED))?;

    Ok(Json(info))
}

pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let request = params.into_request(&state.resolver)?;
    deliver(&state, request).await
}

fn download_error(err: MediaError) -> ApiError {
    ApiError::from_media(err, INVALID_PARAMETERS, DOWNLOAD_FAILED)
}

/// Streams the requested variant, remuxing in a separate audio track when the
/// variant is video without sound.
pub async fn deliver(state: &AppState, request: DownloadRequest) -> ApiResult<Response> {
    let source = state
        .resolver
        .source(&request.source_url)
        .await
        .map_err(download_error)?;

    let format = source.find_format(&request.stream_id).ok_or_else(|| {
        warn!(
            "Format {} not found for {}",
            request.stream_id, request.source_url
        );
        download_error(MediaError::VariantNotFound(request.stream_id.clone()))
    })?;
    let variant = &format.variant;

    let (body, content_type, extension, content_length) = if variant.needs_remux(request.kind) {
        let audio = best_audio(&source.formats).ok_or_else(|| {
            download_error(MediaError::UpstreamFailure(
                "no audio-only format to mux with".to_string(),
            ))
        })?;

        info!(
            "Remuxing video format {} with audio format {}",
            variant.stream_id, audio.variant.stream_id
        );

        let video_stream = state.fetcher.open(format).await.map_err(download_error)?;
        let audio_stream = state.fetcher.open(audio).await.map_err(download_error)?;
        let output = state
            .remuxer
            .remux(video_stream.bytes, audio_stream.bytes)
            .await
            .map_err(download_error)?;
        let output = first_chunk_ready(output)
            .await
            .map_err(|e| download_error(MediaError::RemuxFailure(e.to_string())))?;

        (output, "video/mp4", "mp4", None)
    } else {
        info!("Passing through format {}", variant.stream_id);

        let upstream = state.fetcher.open(format).await.map_err(download_error)?;
        // The body is the upstream response, so its length is authoritative.
        let content_length = upstream.content_length.or(variant.byte_length);
        let output = first_chunk_ready(upstream.bytes)
            .await
            .map_err(|e| download_error(MediaError::StreamUnavailable(e.to_string())))?;

        (
            output,
            variant.container.content_type(request.kind),
            variant.container.extension(),
            content_length,
        )
    };

    let filename = attachment_filename(&source.title, extension);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    if let Some(len) = content_length {
        response = response.header(header::CONTENT_LENGTH, len);
    }

    response
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::internal(format!("{DOWNLOAD_FAILED}: {e}")))
}

/// Waits for the first chunk so that failures before any byte is produced
/// still turn into an error status instead of a broken 200.
async fn first_chunk_ready(mut output: ByteStream) -> std::io::Result<ByteStream> {
    match output.next().await {
        Some(Ok(first)) => Ok(Box::pin(stream::iter([Ok(first)]).chain(output))),
        Some(Err(e)) => Err(e),
        None => Ok(Box::pin(stream::empty::<std::io::Result<bytes::Bytes>>())),
    }
}
