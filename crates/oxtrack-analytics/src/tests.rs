use crate::engine::SqliteAnalyticsEngine;
use crate::search;
use crate::{AnalyticsStore, EventCriteria, WriteAck};
use chrono::{DateTime, Duration, Utc};
use oxtrack_common::types::Event;
use std::collections::HashMap;
use tempfile::TempDir;

fn engine(tmp: &TempDir) -> SqliteAnalyticsEngine {
    SqliteAnalyticsEngine::new(tmp.path(), WriteAck::WaitForAck).unwrap()
}

fn event(id: &str, ts: DateTime<Utc>, project_id: i64, group_id: i64) -> Event {
    Event {
        id: id.to_string(),
        timestamp: ts,
        project_id,
        group_id,
        level: "error".to_string(),
        platform: "rust".to_string(),
        message: format!("something failed in {id}"),
        exceptions: Vec::new(),
        user_id: None,
        user_name: None,
        user_email: None,
        user_ip: None,
        tags: HashMap::new(),
        release: None,
        environment: None,
        server_name: None,
        deleted: false,
        retention_days: 90,
    }
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - Duration::days(3), now + Duration::minutes(1))
}

#[test]
fn store_and_get_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let mut e = event("evt-1", Utc::now(), 1, 10);
    e.tags.insert("release".into(), "1.0.0".into());
    e.user_id = Some("u-1".into());
    store.store_event(&e).unwrap();

    let got = store.get_event("evt-1").unwrap().expect("event present");
    assert_eq!(got.group_id, 10);
    assert_eq!(got.tags.get("release").map(String::as_str), Some("1.0.0"));
    assert_eq!(got.user_id.as_deref(), Some("u-1"));

    assert!(store.get_event("missing").unwrap().is_none());
}

#[test]
fn issue_metrics_merge_across_partitions() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    let yesterday = now - Duration::days(1);

    // Same issue, same user on both days, plus a second user today.
    let mut a = event("a", yesterday, 1, 10);
    a.user_id = Some("alice".into());
    let mut b = event("b", now, 1, 10);
    b.user_id = Some("alice".into());
    let mut c = event("c", now, 1, 10);
    c.user_id = Some("bob".into());
    let d = event("d", now, 1, 10);
    for e in [&a, &b, &c, &d] {
        store.store_event(e).unwrap();
    }

    let (from, to) = window();
    let metrics = store.list_issue_metrics(&[1], &[10], from, to).unwrap();
    assert_eq!(metrics.len(), 1);
    let m = &metrics[0];
    assert_eq!(m.times_seen, 4);
    // Distinct users are deduplicated across partitions; the anonymous
    // event does not count.
    assert_eq!(m.user_count, 2);
    assert!(m.first_seen < m.last_seen);

    // Issues with zero events in the window are absent, not zero-valued.
    let metrics = store.list_issue_metrics(&[1], &[10, 99], from, to).unwrap();
    assert_eq!(metrics.len(), 1);
}

#[test]
fn list_events_is_newest_first_and_paginated() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    for i in 0..5 {
        let e = event(&format!("e{i}"), now - Duration::minutes(i), 1, 10);
        store.store_event(&e).unwrap();
    }

    let (from, to) = window();
    let criteria = EventCriteria {
        project_ids: vec![1],
        from,
        to,
        offset: 1,
        limit: 2,
        ..Default::default()
    };
    let events = store.list_events(&criteria).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, "e1");
    assert_eq!(events[1].id, "e2");
    assert_eq!(store.count_events(&criteria).unwrap(), 5);
}

#[test]
fn free_text_match_is_case_insensitive() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let mut e = event("e1", Utc::now(), 1, 10);
    e.message = "Disk Full on /var".to_string();
    store.store_event(&e).unwrap();
    store.store_event(&event("e2", Utc::now(), 1, 11)).unwrap();

    let (from, to) = window();
    let criteria = EventCriteria {
        project_ids: vec![1],
        free_text: Some("disk full".into()),
        from,
        to,
        ..Default::default()
    };
    let events = store.list_events(&criteria).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "e1");
}

#[test]
fn tag_predicates_filter_and_negate() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();

    let mut a = event("a", now, 1, 10);
    a.tags.insert("release".into(), "1.0.0".into());
    a.tags.insert("server_name".into(), "host-a".into());
    let mut b = event("b", now, 1, 11);
    b.tags.insert("release".into(), "1.0.0".into());
    b.tags.insert("server_name".into(), "host-b".into());
    let mut c = event("c", now, 1, 12);
    c.tags.insert("release".into(), "2.0.0".into());
    for e in [&a, &b, &c] {
        store.store_event(e).unwrap();
    }

    let (from, to) = window();
    let query = search::compile("release:1.0.0 !server_name:host-a");
    let ids = store.filtered_group_ids(&query, &[1], from, to).unwrap();
    assert_eq!(ids, vec![11]);
}

#[test]
fn filtered_group_ids_applies_free_text() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    let mut a = event("a", now, 1, 10);
    a.message = "connection reset by peer".to_string();
    let mut b = event("b", now, 1, 11);
    b.message = "disk full".to_string();
    store.store_event(&a).unwrap();
    store.store_event(&b).unwrap();

    let (from, to) = window();
    let query = search::compile("\"connection reset\"");
    let ids = store.filtered_group_ids(&query, &[1], from, to).unwrap();
    assert_eq!(ids, vec![10]);
}

#[test]
fn project_scoping_excludes_other_projects() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    store.store_event(&event("a", now, 1, 10)).unwrap();
    store.store_event(&event("b", now, 2, 20)).unwrap();

    let (from, to) = window();
    assert_eq!(store.list_group_ids(1, from, to).unwrap(), vec![10]);
    assert_eq!(store.list_group_ids(2, from, to).unwrap(), vec![20]);

    // Empty project set matches nothing rather than everything.
    let criteria = EventCriteria {
        project_ids: vec![],
        from,
        to,
        ..Default::default()
    };
    assert_eq!(store.count_events(&criteria).unwrap(), 0);
}

#[test]
fn soft_deleted_events_vanish_from_queries() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    store.store_event(&event("a", now, 1, 10)).unwrap();
    store.store_event(&event("b", now, 1, 10)).unwrap();
    store.store_event(&event("c", now, 1, 11)).unwrap();

    let flagged = store.soft_delete_group(1, 10).unwrap();
    assert_eq!(flagged, 2);
    // Second pass flags nothing new.
    assert_eq!(store.soft_delete_group(1, 10).unwrap(), 0);

    let (from, to) = window();
    assert_eq!(store.list_group_ids(1, from, to).unwrap(), vec![11]);
    assert!(store.get_event("a").unwrap().is_none());
    let metrics = store.list_issue_metrics(&[1], &[10], from, to).unwrap();
    assert!(metrics.is_empty());
}

#[test]
fn tag_aggregations_count_and_rank() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    for (i, browser) in ["firefox", "firefox", "chrome"].iter().enumerate() {
        let mut e = event(&format!("e{i}"), now, 1, 10);
        e.tags.insert("browser".into(), browser.to_string());
        e.tags.insert("os".into(), "linux".into());
        store.store_event(&e).unwrap();
    }

    let (from, to) = window();
    let keys = store.count_fields(10, 1, from, to, 10).unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.count == 3));

    let values = store.calculate_fields(10, 1, "browser", from, to, 10).unwrap();
    assert_eq!(values[0].value, "firefox");
    assert_eq!(values[0].count, 2);
    assert_eq!(values[1].value, "chrome");
    assert_eq!(values[1].count, 1);

    let popular = store.popular_tags(&[1], from, to, 1).unwrap();
    assert_eq!(popular.len(), 1);

    let browsers = store.tag_values(&[1], "browser", from, to, 10).unwrap();
    assert_eq!(browsers.len(), 2);
}

#[test]
fn buckets_span_partitions() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    let now = Utc::now();
    store.store_event(&event("a", now, 1, 10)).unwrap();
    store.store_event(&event("b", now, 1, 10)).unwrap();
    store
        .store_event(&event("c", now - Duration::days(1), 1, 10))
        .unwrap();

    let (from, to) = window();
    let days = store.events_per_day(&[1], from, to).unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days.iter().map(|b| b.count).sum::<u64>(), 3);

    let hours = store.events_per_hour(&[1], from, to).unwrap();
    assert_eq!(hours.iter().map(|b| b.count).sum::<u64>(), 3);
}

#[test]
fn fire_and_forget_swallows_write_errors() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteAnalyticsEngine::new(tmp.path(), WriteAck::FireAndForget).unwrap();
    // A valid write still works under fire-and-forget.
    store.store_event(&event("a", Utc::now(), 1, 10)).unwrap();
    assert!(store.get_event("a").unwrap().is_some());
}

#[test]
fn schema_info_reports_rows() {
    let tmp = TempDir::new().unwrap();
    let store = engine(&tmp);
    store.store_event(&event("a", Utc::now(), 1, 10)).unwrap();
    store.store_event(&event("b", Utc::now(), 1, 10)).unwrap();

    let schemas = store.list_schemas().unwrap();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].table, "events");
    assert_eq!(schemas[0].row_count, 2);
    assert!(schemas[0].size_bytes > 0);
}
