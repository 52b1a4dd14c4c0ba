use super::{error::MediaError, types::SourceFormat};
use crate::config::ToolsConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use reqwest::{header, Response, StatusCode};
use std::{io, pin::Pin, sync::Arc};
use tracing::{debug, warn};

/// Lazy, singly-consumable byte stream. An `Err` item is terminal.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub struct UpstreamStream {
    pub bytes: ByteStream,
    pub content_length: Option<u64>,
}

#[async_trait]
pub trait StreamFetcher: Send + Sync {
    async fn open(&self, format: &SourceFormat) -> Result<UpstreamStream, MediaError>;
}

pub struct HttpStreamFetcher {
    client: reqwest::Client,
}

impl HttpStreamFetcher {
    pub fn new(tools: &ToolsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(tools.connect_timeout())
            .build()?;
        Ok(Self { client })
    }

    async fn open_whole(&self, format: &SourceFormat) -> Result<UpstreamStream, MediaError> {
        let response = send(&self.client, format, None).await?;
        Ok(whole(response))
    }

    /// Reads the body as consecutive `Range` requests of `chunk` bytes. The
    /// first range is requested eagerly, the rest only as the stream is polled.
    async fn open_ranged(
        &self,
        format: &SourceFormat,
        chunk: u64,
    ) -> Result<UpstreamStream, MediaError> {
        let first = send(&self.client, format, Some((0, chunk - 1))).await?;
        if first.status() != StatusCode::PARTIAL_CONTENT {
            debug!(
                "Upstream ignored range request for format {}, reading whole body",
                format.variant.stream_id
            );
            return Ok(whole(first));
        }

        let Some(total) = content_range_total(&first).or(format.variant.byte_length) else {
            debug!(
                "Upstream did not report a total length for format {}, reading whole body",
                format.variant.stream_id
            );
            drop(first);
            return self.open_whole(format).await;
        };

        let ranges = chunk_ranges(chunk, total, chunk);
        debug!(
            "Fetching format {} in {} ranged requests ({} bytes)",
            format.variant.stream_id,
            ranges.len() + 1,
            total
        );

        let client = self.client.clone();
        let format = Arc::new(format.clone());
        let rest = stream::iter(ranges)
            .then(move |range| {
                let client = client.clone();
                let format = Arc::clone(&format);
                async move {
                    let response = send(&client, &format, Some(range))
                        .await
                        .map_err(io::Error::other)?;
                    if response.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(io::Error::other(format!(
                            "upstream ignored range {}-{}",
                            range.0, range.1
                        )));
                    }
                    Ok(body(response))
                }
            })
            .try_flatten();

        Ok(UpstreamStream {
            bytes: Box::pin(body(first).chain(rest)),
            content_length: Some(total),
        })
    }
}

#[async_trait]
impl StreamFetcher for HttpStreamFetcher {
    async fn open(&self, format: &SourceFormat) -> Result<UpstreamStream, MediaError> {
        debug!("Opening upstream stream for format {}", format.variant.stream_id);

        match format.chunk_size {
            Some(chunk) if chunk > 0 => self.open_ranged(format, chunk).await,
            _ => self.open_whole(format).await,
        }
    }
}

async fn send(
    client: &reqwest::Client,
    format: &SourceFormat,
    range: Option<(u64, u64)>,
) -> Result<Response, MediaError> {
    let mut request = client.get(&format.url);
    for (name, value) in &format.http_headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some((start, end)) = range {
        request = request.header(header::RANGE, format!("bytes={start}-{end}"));
    }

    request
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| {
            warn!(
                "Upstream rejected format {}: {}",
                format.variant.stream_id, e
            );
            MediaError::StreamUnavailable(e.to_string())
        })
}

fn whole(response: Response) -> UpstreamStream {
    UpstreamStream {
        content_length: response.content_length(),
        bytes: body(response),
    }
}

fn body(response: Response) -> ByteStream {
    Box::pin(response.bytes_stream().map_err(io::Error::other))
}

/// Total size from `Content-Range: bytes 0-1023/4096`; `None` for `*`.
fn content_range_total(response: &Response) -> Option<u64> {
    let value = response.headers().get(header::CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.split_once('/')?;
    total.trim().parse().ok()
}

/// Inclusive byte ranges of at most `chunk` bytes covering `start..total`.
fn chunk_ranges(start: u64, total: u64, chunk: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    if chunk == 0 {
        return ranges;
    }

    let mut offset = start;
    while offset < total {
        let end = offset.saturating_add(chunk).min(total) - 1;
        ranges.push((offset, end));
        offset = end + 1;
    }
    ranges
}
