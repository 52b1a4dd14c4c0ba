use thiserror::Error;

/// Failures of the resolve/fetch/remux pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    /// URL is not a recognised source link.
    #[error("invalid source url: {0}")]
    InvalidSource(String),
    /// Extractor could not retrieve metadata.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    /// Upstream rejected the stream request or the transfer broke.
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error("variant {0} not found")]
    VariantNotFound(String),
    #[error("remux failed: {0}")]
    RemuxFailure(String),
}
