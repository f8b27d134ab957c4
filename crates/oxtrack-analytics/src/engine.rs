use crate::builder::WhereBuilder;
use crate::diagnostics::{Diagnostics, SlowQuery, StoreErrorEntry};
use crate::partition::PartitionManager;
use crate::search::SearchQuery;
use crate::{AnalyticsStore, BucketCount, EventCriteria, SchemaInfo, TagKeyCount, TagValueCount, WriteAck};
use anyhow::Result;
use chrono::{DateTime, Utc};
use oxtrack_common::types::{Event, ExceptionInfo, IssueMetrics};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

const EVENT_COLUMNS: &str = "id, timestamp, project_id, group_id, level, platform, message, \
     exceptions, user_id, user_name, user_email, user_ip, tags, tag_hashes, \
     release_version, environment, server_name, deleted, retention_days";

pub struct SqliteAnalyticsEngine {
    partitions: PartitionManager,
    diagnostics: Diagnostics,
    write_ack: WriteAck,
}

impl SqliteAnalyticsEngine {
    pub fn new(data_dir: &Path, write_ack: WriteAck) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
            diagnostics: Diagnostics::default(),
            write_ack,
        })
    }

    /// Run one store operation under diagnostics observation: duration is
    /// recorded, and failures land in the error ring buffer before they
    /// propagate.
    fn observe<T>(&self, label: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = f();
        self.diagnostics.record_query(label, started.elapsed());
        if let Err(e) = &result {
            self.diagnostics.record_error(label, e);
        }
        result
    }

    /// Base filter shared by every scoped query: soft-delete exclusion,
    /// time window, project id set.
    fn scoped_filter(
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> WhereBuilder {
        let mut b = WhereBuilder::new();
        b.raw("deleted = 0")
            .cmp("timestamp", ">=", from.timestamp_millis())
            .cmp("timestamp", "<=", to.timestamp_millis())
            .in_list("project_id", project_ids.to_vec());
        b
    }

    /// Matching rows from every partition in range, with each row's
    /// precomputed tag-hash set for predicate evaluation.
    fn select_scoped(
        &self,
        builder: &WhereBuilder,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(Event, HashSet<String>)>> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events{}", builder.sql());
        let mut results = Vec::new();
        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                results.extend(select_events(conn, &sql, builder)?);
                Ok(())
            })?;
        }
        Ok(results)
    }
}

impl AnalyticsStore for SqliteAnalyticsEngine {
    fn store_event(&self, event: &Event) -> Result<()> {
        let result = self.observe("store_event", || {
            let key = self.partitions.get_or_create(event.timestamp)?;
            let exceptions = serde_json::to_string(&event.exceptions)?;
            let tags = serde_json::to_string(&event.tags)?;
            let hashes: Vec<String> = oxtrack_fingerprint::tag_hashes(event).into_iter().collect();
            let tag_hashes = serde_json::to_string(&hashes)?;
            self.partitions.with_partition(&key, |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO events (id, timestamp, project_id, group_id, level, \
                     platform, message, exceptions, user_id, user_name, user_email, user_ip, \
                     tags, tag_hashes, release_version, environment, server_name, deleted, \
                     retention_days) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19)",
                    rusqlite::params![
                        &event.id,
                        event.timestamp.timestamp_millis(),
                        event.project_id,
                        event.group_id,
                        &event.level,
                        &event.platform,
                        &event.message,
                        exceptions,
                        &event.user_id,
                        &event.user_name,
                        &event.user_email,
                        &event.user_ip,
                        tags,
                        tag_hashes,
                        &event.release,
                        &event.environment,
                        &event.server_name,
                        event.deleted as i64,
                        event.retention_days,
                    ],
                )?;
                Ok(())
            })
        });

        match (self.write_ack, result) {
            (_, Ok(())) => Ok(()),
            (WriteAck::WaitForAck, Err(e)) => Err(e),
            (WriteAck::FireAndForget, Err(e)) => {
                tracing::error!(event_id = %event.id, error = %e, "Dropped event write (fire-and-forget)");
                Ok(())
            }
        }
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        self.observe("get_event", || {
            let mut keys = self.partitions.all_partitions()?;
            keys.reverse();
            let mut builder = WhereBuilder::new();
            builder.raw("deleted = 0").cmp("id", "=", event_id.to_string());
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events{}", builder.sql());
            for key in keys {
                let found = self.partitions.with_partition(&key, |conn| {
                    Ok(select_events(conn, &sql, &builder)?.into_iter().next())
                })?;
                if let Some((event, _)) = found {
                    return Ok(Some(event));
                }
            }
            Ok(None)
        })
    }

    fn list_issue_metrics(
        &self,
        project_ids: &[i64],
        group_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IssueMetrics>> {
        self.observe("list_issue_metrics", || {
            let mut builder = Self::scoped_filter(project_ids, from, to);
            builder.in_list("group_id", group_ids.to_vec());
            let sql = format!(
                "SELECT group_id, user_id, COUNT(*), MIN(timestamp), MAX(timestamp) \
                 FROM events{} GROUP BY group_id, user_id",
                builder.sql()
            );

            struct Acc {
                times_seen: u64,
                users: HashSet<String>,
                first_ms: i64,
                last_ms: i64,
            }
            let mut by_group: BTreeMap<i64, Acc> = BTreeMap::new();

            let keys = self.partitions.partitions_in_range(from, to)?;
            for key in keys {
                self.partitions.with_partition(&key, |conn| {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(builder.params().as_slice(), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })?;
                    for row in rows {
                        let (group_id, user_id, count, first_ms, last_ms) = row?;
                        let acc = by_group.entry(group_id).or_insert(Acc {
                            times_seen: 0,
                            users: HashSet::new(),
                            first_ms: i64::MAX,
                            last_ms: i64::MIN,
                        });
                        acc.times_seen += count as u64;
                        if let Some(uid) = user_id {
                            if !uid.is_empty() {
                                acc.users.insert(uid);
                            }
                        }
                        acc.first_ms = acc.first_ms.min(first_ms);
                        acc.last_ms = acc.last_ms.max(last_ms);
                    }
                    Ok(())
                })?;
            }

            Ok(by_group
                .into_iter()
                .map(|(group_id, acc)| IssueMetrics {
                    group_id,
                    times_seen: acc.times_seen,
                    user_count: acc.users.len() as u64,
                    first_seen: DateTime::from_timestamp_millis(acc.first_ms).unwrap_or_default(),
                    last_seen: DateTime::from_timestamp_millis(acc.last_ms).unwrap_or_default(),
                })
                .collect())
        })
    }

    fn list_group_ids(
        &self,
        project_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        self.observe("list_group_ids", || {
            let builder = Self::scoped_filter(&[project_id], from, to);
            let sql = format!("SELECT DISTINCT group_id FROM events{}", builder.sql());
            let mut ids = BTreeSet::new();
            for key in self.partitions.partitions_in_range(from, to)? {
                self.partitions.with_partition(&key, |conn| {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows =
                        stmt.query_map(builder.params().as_slice(), |row| row.get::<_, i64>(0))?;
                    for row in rows {
                        ids.insert(row?);
                    }
                    Ok(())
                })?;
            }
            Ok(ids.into_iter().collect())
        })
    }

    fn count_fields(
        &self,
        group_id: i64,
        project_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagKeyCount>> {
        self.observe("count_fields", || {
            let mut builder = Self::scoped_filter(&[project_id], from, to);
            builder.cmp("group_id", "=", group_id);
            let rows = self.select_scoped(&builder, from, to)?;

            let mut counts: HashMap<String, u64> = HashMap::new();
            for (event, _) in &rows {
                for key in event.tags.keys() {
                    *counts.entry(key.clone()).or_insert(0) += 1;
                }
            }
            Ok(top_key_counts(counts, limit))
        })
    }

    fn calculate_fields(
        &self,
        group_id: i64,
        project_id: i64,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagValueCount>> {
        self.observe("calculate_fields", || {
            let mut builder = Self::scoped_filter(&[project_id], from, to);
            builder.cmp("group_id", "=", group_id);
            let rows = self.select_scoped(&builder, from, to)?;

            let mut counts: HashMap<String, u64> = HashMap::new();
            for (event, _) in &rows {
                if let Some(value) = event.tags.get(key) {
                    *counts.entry(value.clone()).or_insert(0) += 1;
                }
            }
            Ok(top_value_counts(counts, limit))
        })
    }

    fn list_events(&self, criteria: &EventCriteria) -> Result<Vec<Event>> {
        self.observe("list_events", || {
            let mut rows = self.select_criteria(criteria)?;
            rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(rows
                .into_iter()
                .skip(criteria.offset)
                .take(criteria.limit)
                .collect())
        })
    }

    fn count_events(&self, criteria: &EventCriteria) -> Result<u64> {
        self.observe("count_events", || {
            Ok(self.select_criteria(criteria)?.len() as u64)
        })
    }

    fn filtered_group_ids(
        &self,
        query: &SearchQuery,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        self.observe("filtered_group_ids", || {
            // Free-text narrowing happens in SQL; tag predicates in Rust.
            let mut builder = Self::scoped_filter(project_ids, from, to);
            for text in &query.free_text {
                builder.contains("message", text);
            }
            let rows = self.select_scoped(&builder, from, to)?;

            let mut ids = BTreeSet::new();
            for (event, hashes) in rows {
                if predicates_match(&query.predicates, &hashes) {
                    ids.insert(event.group_id);
                }
            }
            Ok(ids.into_iter().collect())
        })
    }

    fn events_per_day(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>> {
        self.observe("events_per_day", || {
            self.bucketed_counts(project_ids, from, to, "%Y-%m-%d")
        })
    }

    fn events_per_hour(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BucketCount>> {
        self.observe("events_per_hour", || {
            self.bucketed_counts(project_ids, from, to, "%Y-%m-%dT%H")
        })
    }

    fn popular_tags(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagKeyCount>> {
        self.observe("popular_tags", || {
            let builder = Self::scoped_filter(project_ids, from, to);
            let rows = self.select_scoped(&builder, from, to)?;
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (event, _) in &rows {
                for key in event.tags.keys() {
                    *counts.entry(key.clone()).or_insert(0) += 1;
                }
            }
            Ok(top_key_counts(counts, limit))
        })
    }

    fn tag_values(
        &self,
        project_ids: &[i64],
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TagValueCount>> {
        self.observe("tag_values", || {
            let builder = Self::scoped_filter(project_ids, from, to);
            let rows = self.select_scoped(&builder, from, to)?;
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (event, _) in &rows {
                if let Some(value) = event.tags.get(key) {
                    *counts.entry(value.clone()).or_insert(0) += 1;
                }
            }
            Ok(top_value_counts(counts, limit))
        })
    }

    fn soft_delete_group(&self, project_id: i64, group_id: i64) -> Result<u64> {
        self.observe("soft_delete_group", || {
            let mut flagged = 0u64;
            for key in self.partitions.all_partitions()? {
                flagged += self.partitions.with_partition(&key, |conn| {
                    let n = conn.execute(
                        "UPDATE events SET deleted = 1 \
                         WHERE project_id = ?1 AND group_id = ?2 AND deleted = 0",
                        rusqlite::params![project_id, group_id],
                    )?;
                    Ok(n as u64)
                })?;
            }
            Ok(flagged)
        })
    }

    fn cleanup(&self, retention_days: u32) -> Result<u32> {
        self.observe("cleanup", || self.partitions.cleanup_older_than(retention_days))
    }

    fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        self.observe("list_schemas", || self.partitions.list_schema_info())
    }

    fn list_slow_queries(&self) -> Result<Vec<SlowQuery>> {
        Ok(self.diagnostics.slow_queries())
    }

    fn list_errors(&self) -> Result<Vec<StoreErrorEntry>> {
        Ok(self.diagnostics.errors())
    }
}

impl SqliteAnalyticsEngine {
    /// SQL-narrowed rows for an [`EventCriteria`], with tag predicates
    /// applied in Rust against each row's membership set.
    fn select_criteria(&self, criteria: &EventCriteria) -> Result<Vec<Event>> {
        let mut builder = Self::scoped_filter(&criteria.project_ids, criteria.from, criteria.to);
        if let Some(group_id) = criteria.group_id {
            builder.cmp("group_id", "=", group_id);
        }
        if let Some(text) = &criteria.free_text {
            builder.contains("message", text);
        }
        let rows = self.select_scoped(&builder, criteria.from, criteria.to)?;
        Ok(rows
            .into_iter()
            .filter(|(_, hashes)| predicates_match(&criteria.tag_predicates, hashes))
            .map(|(event, _)| event)
            .collect())
    }

    fn bucketed_counts(
        &self,
        project_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        format: &str,
    ) -> Result<Vec<BucketCount>> {
        let builder = Self::scoped_filter(project_ids, from, to);
        let sql = format!(
            "SELECT strftime('{format}', timestamp / 1000, 'unixepoch') AS bucket, COUNT(*) \
             FROM events{} GROUP BY bucket",
            builder.sql()
        );
        let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
        for key in self.partitions.partitions_in_range(from, to)? {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(builder.params().as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (bucket, count) = row?;
                    *buckets.entry(bucket).or_insert(0) += count as u64;
                }
                Ok(())
            })?;
        }
        Ok(buckets
            .into_iter()
            .map(|(bucket, count)| BucketCount { bucket, count })
            .collect())
    }
}

fn predicates_match(
    predicates: &[crate::search::TagPredicate],
    hashes: &HashSet<String>,
) -> bool {
    predicates
        .iter()
        .all(|p| hashes.contains(&p.tag_hash()) != p.negated)
}

fn select_events(
    conn: &Connection,
    sql: &str,
    builder: &WhereBuilder,
) -> Result<Vec<(Event, HashSet<String>)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(builder.params().as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, Option<String>>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, String>(12)?,
            row.get::<_, String>(13)?,
            row.get::<_, Option<String>>(14)?,
            row.get::<_, Option<String>>(15)?,
            row.get::<_, Option<String>>(16)?,
            row.get::<_, i64>(17)?,
            row.get::<_, u32>(18)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (
            id,
            ts_ms,
            project_id,
            group_id,
            level,
            platform,
            message,
            exceptions_json,
            user_id,
            user_name,
            user_email,
            user_ip,
            tags_json,
            tag_hashes_json,
            release,
            environment,
            server_name,
            deleted,
            retention_days,
        ) = row?;
        let exceptions: Vec<ExceptionInfo> = serde_json::from_str(&exceptions_json)?;
        let tags: HashMap<String, String> = serde_json::from_str(&tags_json)?;
        let hashes: HashSet<String> = serde_json::from_str::<Vec<String>>(&tag_hashes_json)?
            .into_iter()
            .collect();
        results.push((
            Event {
                id,
                timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
                project_id,
                group_id,
                level,
                platform,
                message,
                exceptions,
                user_id,
                user_name,
                user_email,
                user_ip,
                tags,
                release,
                environment,
                server_name,
                deleted: deleted != 0,
                retention_days,
            },
            hashes,
        ));
    }
    Ok(results)
}

fn top_key_counts(counts: HashMap<String, u64>, limit: usize) -> Vec<TagKeyCount> {
    let mut out: Vec<TagKeyCount> = counts
        .into_iter()
        .map(|(key, count)| TagKeyCount { key, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
    out.truncate(limit);
    out
}

fn top_value_counts(counts: HashMap<String, u64>, limit: usize) -> Vec<TagValueCount> {
    let mut out: Vec<TagValueCount> = counts
        .into_iter()
        .map(|(value, count)| TagValueCount { value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then(a.value.cmp(&b.value)));
    out.truncate(limit);
    out
}
