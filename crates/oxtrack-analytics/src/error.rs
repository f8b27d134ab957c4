/// Errors that can occur within the analytics store.
///
/// The `AnalyticsStore` trait returns `anyhow::Result` at its surface; this
/// enum provides the typed variants those errors wrap so callers that care
/// can downcast.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// A requested partition is not present on disk or in the cache.
    #[error("Analytics: partition {0} not found")]
    PartitionNotFound(String),
}
