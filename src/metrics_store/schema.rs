use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

/// V 0
pub const METRIC_EVENT_TABLE: Table = Table {
    name: "metric_event",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("metric_type", &SqlType::Text, non_null = true),
        sqlite_column!("subject_id", &SqlType::Text, non_null = true),
        sqlite_column!("actor_id", &SqlType::Text),
        sqlite_column!("value", &SqlType::Real, non_null = true),
        sqlite_column!("occurred_at", &SqlType::Integer, non_null = true),
        sqlite_column!("category", &SqlType::Text),
        sqlite_column!("artist_id", &SqlType::Text),
        sqlite_column!("metadata", &SqlType::Text),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    unique_constraints: &[],
    indices: &[
        ("idx_metric_event_type_time", "metric_type, occurred_at"),
        ("idx_metric_event_subject", "subject_id"),
        ("idx_metric_event_artist", "artist_id"),
    ],
};

pub const DAILY_AGGREGATE_TABLE: Table = Table {
    name: "daily_aggregate",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("metric_type", &SqlType::Text, non_null = true),
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("count", &SqlType::Integer, non_null = true),
        sqlite_column!("total_value", &SqlType::Real, non_null = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    // The at-most-once aggregation guarantee hangs off this constraint.
    unique_constraints: &[&["metric_type", "date"]],
    indices: &[("idx_daily_aggregate_date", "date")],
};

pub const SUBJECT_COUNTER_TABLE: Table = Table {
    name: "subject_counter",
    columns: &[
        sqlite_column!("subject_id", &SqlType::Text, non_null = true),
        sqlite_column!("counter", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Real, non_null = true),
        sqlite_column!(
            "updated",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    unique_constraints: &[&["subject_id", "counter"]],
    indices: &[],
};

pub const QUALITY_SCORE_TABLE: Table = Table {
    name: "quality_score",
    columns: &[
        sqlite_column!(
            "subject_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("score", &SqlType::Real, non_null = true),
        sqlite_column!(
            "updated",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    unique_constraints: &[],
    indices: &[],
};

pub const METRICS_VERSIONED_SCHEMAS: [VersionedSchema; 1] = [VersionedSchema {
    version: 0,
    tables: &[
        METRIC_EVENT_TABLE,
        DAILY_AGGREGATE_TABLE,
        SUBJECT_COUNTER_TABLE,
        QUALITY_SCORE_TABLE,
    ],
    migration: None,
}];
