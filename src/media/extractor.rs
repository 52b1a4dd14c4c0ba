use super::{error::MediaError, types::SourceMedia};
use async_trait::async_trait;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name of the extractor
    fn name(&self) -> &'static str;

    /// Whether the URL is a link this extractor understands
    fn validate_url(&self, url: &str) -> bool;

    /// Fetch metadata and every fetchable format for the URL
    async fn extract(&self, url: &str) -> Result<SourceMedia, MediaError>;
}
