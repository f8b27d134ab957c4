//! Analytics store for the append-only error-event stream.
//!
//! The default implementation ([`engine::SqliteAnalyticsEngine`]) uses daily
//! time-partitioned SQLite databases with WAL mode for concurrent reads.
//! Tag filtering runs against a precomputed per-event `key=value` membership
//! set rather than scanning raw tag arrays, and all aggregate queries are
//! scoped by project id set, time window, and soft-delete exclusion.

pub mod builder;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod partition;
pub mod search;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use oxtrack_common::types::{Event, IssueMetrics};
use search::{SearchQuery, TagPredicate};

/// Store-event acknowledgment policy, fixed at construction time.
///
/// `FireAndForget` logs and records write failures instead of returning
/// them; `WaitForAck` propagates them to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteAck {
    #[default]
    WaitForAck,
    FireAndForget,
}

/// Criteria for filtered event listing and counting.
///
/// # Examples
///
/// ```
/// use oxtrack_analytics::EventCriteria;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let criteria = EventCriteria {
///     project_ids: vec![1],
///     free_text: Some("disk full".into()),
///     from: now - Duration::hours(1),
///     to: now,
///     limit: 50,
///     ..Default::default()
/// };
/// assert_eq!(criteria.project_ids, vec![1]);
/// ```
#[derive(Debug, Clone)]
pub struct EventCriteria {
    pub project_ids: Vec<i64>,
    pub group_id: Option<i64>,
    /// Case-insensitive substring match on the event message.
    pub free_text: Option<String>,
    /// Evaluated as membership tests against each event's tag-hash set.
    pub tag_predicates: Vec<TagPredicate>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for EventCriteria {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            project_ids: Vec::new(),
            group_id: None,
            free_text: None,
            tag_predicates: Vec::new(),
            from: now - chrono::Duration::days(90),
            to: now,
            offset: 0,
            limit: 100,
        }
    }
}

/// Occurrence count for one tag key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TagKeyCount {
    pub key: String,
    pub count: u64,
}

/// Occurrence count for one value of a tag key. The percentage of the key's
/// total is computed by the caller as `count / key_total * 100`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TagValueCount {
    pub value: String,
    pub count: u64,
}

/// One time bucket (day or hour) with its event count.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BucketCount {
    pub bucket: String,
    pub count: u64,
}

/// Partition/table information for the diagnostics surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaInfo {
    pub partition: String,
    pub table: String,
    pub row_count: u64,
    pub size_bytes: u64,
    pub path: String,
}

/// Query surface over the event fact stream.
///
/// Implementations must be safe to share across threads (`Send + Sync`):
/// the store is read by the alert evaluation worker and the query API
/// concurrently. A failed scan returns an error wrapping the cause; partial
/// results are never returned.
pub trait AnalyticsStore: Send + Sync {
    /// Appends one event. Honors the engine's [`WriteAck`] policy.
    fn store_event(&self, event: &Event) -> Result<()>;

    /// Fetches a single event by id, scanning partitions newest-first.
    fn get_event(&self, event_id: &str) -> Result<Option<Event>>;

    /// Derived metrics for each issue id with at least one matching event in
    /// the window. Issues with zero events are silently absent.
    fn list_issue_metrics(
        &self,
        project_ids: &[i64],
        group_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IssueMetrics>>;

    /// Distinct issue ids with events in the window for a project.
    fn list_group_ids(
        &self,
        project_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>>;

    /// Total occurrences per tag key for one issue, top-N by count.
    fn count_fields(
        &self,
        group_id: i64,
        project_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagKeyCount>>;

    /// Occurrences per value of one tag key for one issue, top-N by count.
    fn calculate_fields(
        &self,
        group_id: i64,
        project_id: i64,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagValueCount>>;

    /// Filtered events, newest first, offset/limit paginated.
    fn list_events(&self, criteria: &EventCriteria) -> Result<Vec<Event>>;

    /// Total rows matching the criteria (pagination ignored).
    fn count_events(&self, criteria: &EventCriteria) -> Result<u64>;

    /// Distinct issue ids matching a compiled search query.
    fn filtered_group_ids(
        &self,
        query: &SearchQuery,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>>;

    /// Event counts bucketed by UTC day (`YYYY-MM-DD`).
    fn events_per_day(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>>;

    /// Event counts bucketed by UTC hour (`YYYY-MM-DDTHH`).
    fn events_per_hour(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>>;

    /// Most frequent tag keys across the project set, top-N.
    fn popular_tags(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagKeyCount>>;

    /// Most frequent values of one tag key across the project set, top-N.
    fn tag_values(
        &self,
        project_ids: &[i64],
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagValueCount>>;

    /// Soft-deletes every event of an issue. Returns rows flagged.
    fn soft_delete_group(&self, project_id: i64, group_id: i64) -> Result<u64>;

    /// Removes partitions older than `retention_days`. Returns the number of
    /// partitions removed.
    fn cleanup(&self, retention_days: u32) -> Result<u32>;

    /// Partition/table information (diagnostics).
    fn list_schemas(&self) -> Result<Vec<SchemaInfo>>;

    /// Recently recorded slow queries (diagnostics).
    fn list_slow_queries(&self) -> Result<Vec<diagnostics::SlowQuery>>;

    /// Recently recorded store errors (diagnostics).
    fn list_errors(&self) -> Result<Vec<diagnostics::StoreErrorEntry>>;
}
