//! Persistent event and aggregate storage.
//!
//! The event log is the source of truth: append-only, never mutated.
//! Everything else (daily aggregates, subject counters) is derived from it.

mod models;
mod schema;
mod sqlite_metrics_store;

pub use models::{
    DailyAggregate, EventFilter, MetricBucket, MetricEvent, MetricType, SubjectActivity,
    TopSubject, ALL_METRIC_TYPES,
};
pub use schema::METRICS_VERSIONED_SCHEMAS;
pub use sqlite_metrics_store::SqliteMetricsStore;

use crate::ranking::EntityClass;
use anyhow::Result;
use std::collections::HashMap;

/// A new event to append; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMetricEvent {
    pub metric_type: MetricType,
    pub subject_id: String,
    pub actor_id: Option<String>,
    pub value: f64,
    pub occurred_at: i64,
    pub category: Option<String>,
    pub artist_id: Option<String>,
    pub metadata: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Narrow repository boundary over the analytics database.
///
/// Implementations must be safe to share across many concurrent callers;
/// counter increments in particular must be atomic (no lost updates).
pub trait MetricsStore: Send + Sync {
    /// Appends one event and returns its id.
    /// Returns Err if the write fails; events are never silently dropped.
    fn append_event(&self, event: NewMetricEvent) -> Result<i64>;

    /// Returns raw events matching the filter, oldest first.
    fn query_events(&self, filter: &EventFilter) -> Result<Vec<MetricEvent>>;

    /// Groups raw events of one type into time buckets using an SQLite
    /// strftime format (e.g. "%Y-%m-%d"). Bounds are inclusive.
    fn bucket_events(
        &self,
        metric_type: MetricType,
        bucket_format: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<MetricBucket>>;

    /// Top subjects for one metric type within the window, ordered by
    /// summed value when `order_by_value` is set (sales) and by event count
    /// otherwise, then by most recent activity, then by id.
    fn top_subjects(
        &self,
        metric_type: MetricType,
        since_ts: i64,
        limit: usize,
        order_by_value: bool,
    ) -> Result<Vec<TopSubject>>;

    /// Like `top_subjects` but grouped by the linked `artist_id` column,
    /// for artist leaderboards derived from artwork activity.
    fn top_linked_artists(
        &self,
        metric_type: MetricType,
        since_ts: i64,
        limit: usize,
        order_by_value: bool,
    ) -> Result<Vec<TopSubject>>;

    /// Candidate pool retrieval for the ranking pipeline: subjects of the
    /// given entity class with any tracked activity since `since_ts`,
    /// optionally filtered by category, ordered by total activity (desc)
    /// then id, truncated to `limit`.
    fn collect_candidate_metrics(
        &self,
        entity: EntityClass,
        since_ts: i64,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SubjectActivity>>;

    /// Inserts the aggregate row unless one already exists for
    /// (metric_type, date). Returns true if the row was inserted, false if
    /// it was already present. Concurrent invocations for the same key
    /// resolve through the unique constraint: exactly one inserts.
    fn insert_aggregate_if_absent(&self, aggregate: &DailyAggregate) -> Result<bool>;

    /// Returns aggregates for one metric type within a date range, ascending.
    fn get_aggregates(
        &self,
        metric_type: MetricType,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<DailyAggregate>>;

    /// Returns all aggregates for one day, across metric types.
    fn get_aggregates_for_date(&self, date: chrono::NaiveDate) -> Result<Vec<DailyAggregate>>;

    /// Count and value sum of one metric type inside [start_ts, end_ts].
    fn summarize_events(
        &self,
        metric_type: MetricType,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<(u64, f64)>;

    /// Atomically adds `delta` to a named per-subject counter, creating it
    /// at zero first if needed. Returns the new value.
    fn increment_subject_counter(&self, subject_id: &str, counter: &str, delta: f64)
        -> Result<f64>;

    /// Current value of a per-subject counter, or None if never written.
    fn get_subject_counter(&self, subject_id: &str, counter: &str) -> Result<Option<f64>>;

    /// Quality annotations for the given subjects. Subjects without an
    /// annotation are absent from the map (and score 0 downstream).
    fn quality_scores(&self, subject_ids: &[String]) -> Result<HashMap<String, f64>>;

    /// Upserts the quality annotation for one subject.
    fn set_quality_score(&self, subject_id: &str, score: f64) -> Result<()>;
}
