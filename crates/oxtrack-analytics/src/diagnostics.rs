//! Operational self-diagnostics for the analytics engine.
//!
//! The engine records every query's label and duration here; queries over
//! the slow threshold and failed operations land in bounded ring buffers
//! that the diagnostics endpoints read back out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default number of entries each ring buffer retains.
const DEFAULT_CAPACITY: usize = 256;

/// Queries at or above this duration are recorded as slow.
const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct SlowQuery {
    pub label: String,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreErrorEntry {
    pub context: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

pub struct Diagnostics {
    slow_threshold: Duration,
    capacity: usize,
    slow: Mutex<VecDeque<SlowQuery>>,
    errors: Mutex<VecDeque<StoreErrorEntry>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD, DEFAULT_CAPACITY)
    }
}

impl Diagnostics {
    pub fn new(slow_threshold: Duration, capacity: usize) -> Self {
        Self {
            slow_threshold,
            capacity,
            slow: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    fn lock_slow(&self) -> MutexGuard<'_, VecDeque<SlowQuery>> {
        self.slow.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_errors(&self) -> MutexGuard<'_, VecDeque<StoreErrorEntry>> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_query(&self, label: &str, elapsed: Duration) {
        if elapsed < self.slow_threshold {
            return;
        }
        let mut slow = self.lock_slow();
        if slow.len() == self.capacity {
            slow.pop_front();
        }
        slow.push_back(SlowQuery {
            label: label.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            at: Utc::now(),
        });
    }

    pub fn record_error(&self, context: &str, error: &anyhow::Error) {
        let mut errors = self.lock_errors();
        if errors.len() == self.capacity {
            errors.pop_front();
        }
        errors.push_back(StoreErrorEntry {
            context: context.to_string(),
            error: format!("{error:#}"),
            at: Utc::now(),
        });
    }

    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.lock_slow().iter().cloned().collect()
    }

    pub fn errors(&self) -> Vec<StoreErrorEntry> {
        self.lock_errors().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_queries_are_not_recorded() {
        let diag = Diagnostics::new(Duration::from_millis(50), 8);
        diag.record_query("list_events", Duration::from_millis(5));
        assert!(diag.slow_queries().is_empty());
    }

    #[test]
    fn slow_queries_are_recorded_and_bounded() {
        let diag = Diagnostics::new(Duration::from_millis(10), 2);
        for i in 0..5 {
            diag.record_query(&format!("q{i}"), Duration::from_millis(20));
        }
        let slow = diag.slow_queries();
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].label, "q3");
        assert_eq!(slow[1].label, "q4");
    }

    #[test]
    fn errors_are_recorded() {
        let diag = Diagnostics::default();
        diag.record_error("store_event", &anyhow::anyhow!("disk full"));
        let errors = diag.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.contains("disk full"));
    }
}
