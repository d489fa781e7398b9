//! Sync watermark log.

use crate::error::CatalogResult;
use alyx_core::Watermark;
use async_trait::async_trait;

/// Append-only log of windows covered by successful incremental syncs.
#[async_trait]
pub trait WatermarkRepo: Send + Sync {
    /// Append an entry. Fails if it starts before the previous entry on the channel ended.
    async fn append_watermark(&self, watermark: &Watermark) -> CatalogResult<()>;

    async fn last_watermark(&self, channel: &str) -> CatalogResult<Option<Watermark>>;

    /// Entries for a channel in append order.
    async fn list_watermarks(&self, channel: &str) -> CatalogResult<Vec<Watermark>>;
}
