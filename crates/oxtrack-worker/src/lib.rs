//! Periodic alert evaluation.
//!
//! The [`AlertSweeper`] wakes on a fixed tick, takes a short-lived
//! per-alert lock in the registry so concurrent instances never evaluate
//! the same alert twice, compares the alert's derived metric against its
//! threshold, and fans out webhook notifications on state transitions.

pub mod sweeper;


pub use sweeper::AlertSweeper;

use anyhow::Result;
use chrono::{DateTime, Utc};
use oxtrack_analytics::engine::SqliteAnalyticsEngine;
use oxtrack_analytics::AnalyticsStore;
use oxtrack_common::types::IssueMetrics;

/// The slice of the analytics store the sweeper reads. Narrow on purpose:
/// tests substitute a fixed-value source without standing up partitions.
pub trait MetricsSource: Send + Sync {
    /// Issue ids with events for a project in the window.
    fn group_ids(&self, project_id: i64, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<Vec<i64>>;

    /// Derived metrics for those issues.
    fn issue_metrics(
        &self,
        project_id: i64,
        group_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IssueMetrics>>;
}

impl MetricsSource for SqliteAnalyticsEngine {
    fn group_ids(
        &self,
        project_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        self.list_group_ids(project_id, from, to)
    }

    fn issue_metrics(
        &self,
        project_id: i64,
        group_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IssueMetrics>> {
        self.list_issue_metrics(&[project_id], group_ids, from, to)
    }
}
