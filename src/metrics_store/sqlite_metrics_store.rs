use super::models::*;
use super::schema::METRICS_VERSIONED_SCHEMAS;
use super::{MetricsStore, NewMetricEvent};
use crate::ranking::EntityClass;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed analytics store.
///
/// All access goes through a single connection guarded by a mutex; SQLite
/// serializes the statements, and single-statement UPSERTs keep counter
/// increments atomic under concurrency.
pub struct SqliteMetricsStore {
    conn: Mutex<Connection>,
}

impl SqliteMetricsStore {
    pub fn new(db_file_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_file_path)
            .with_context(|| format!("Failed to open analytics db at {:?}", db_file_path))?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let version: usize = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let latest = METRICS_VERSIONED_SCHEMAS
            .last()
            .expect("at least one schema version");

        if version == 0 {
            info!("Creating analytics schema at version {}", latest.version);
            latest.create(&conn)?;
        } else {
            Self::migrate_if_needed(&conn, version - BASE_DB_VERSION)?;
            latest.validate(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        let mut latest_from = version;
        for schema in METRICS_VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating analytics db from version {} to {}",
                    latest_from, schema.version
                );
                migration_fn(conn)?;
                latest_from = schema.version;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        Ok(())
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<MetricEvent> {
    let metric_type_str: String = row.get(1)?;
    let metric_type = MetricType::parse(&metric_type_str)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(1, metric_type_str.clone(), Type::Text))?;
    let metadata_json: Option<String> = row.get(8)?;
    let metadata: BTreeMap<String, serde_json::Value> = match metadata_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|_| rusqlite::Error::InvalidColumnType(8, "metadata".to_string(), Type::Text))?,
        None => BTreeMap::new(),
    };
    Ok(MetricEvent {
        id: row.get(0)?,
        metric_type,
        subject_id: row.get(2)?,
        actor_id: row.get(3)?,
        value: row.get(4)?,
        occurred_at: row.get(5)?,
        category: row.get(6)?,
        artist_id: row.get(7)?,
        metadata,
    })
}

fn row_to_top_subject(row: &Row<'_>) -> rusqlite::Result<TopSubject> {
    Ok(TopSubject {
        subject_id: row.get(0)?,
        count: row.get::<_, i64>(1)? as u64,
        total_value: row.get(2)?,
        last_activity_at: row.get(3)?,
    })
}

fn row_to_aggregate(row: &Row<'_>) -> rusqlite::Result<DailyAggregate> {
    let metric_type_str: String = row.get(0)?;
    let metric_type = MetricType::parse(&metric_type_str)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(0, metric_type_str.clone(), Type::Text))?;
    let date_str: String = row.get(1)?;
    let date = NaiveDate::from_str(&date_str)
        .map_err(|_| rusqlite::Error::InvalidColumnType(1, date_str.clone(), Type::Text))?;
    Ok(DailyAggregate {
        metric_type,
        date,
        count: row.get::<_, i64>(2)? as u64,
        total_value: row.get(3)?,
    })
}

impl MetricsStore for SqliteMetricsStore {
    fn append_event(&self, event: NewMetricEvent) -> Result<i64> {
        let metadata_json = if event.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.metadata)?)
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metric_event
                (metric_type, subject_id, actor_id, value, occurred_at, category, artist_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.metric_type.as_str(),
                event.subject_id,
                event.actor_id,
                event.value,
                event.occurred_at,
                event.category,
                event.artist_id,
                metadata_json,
            ],
        )
        .with_context(|| format!("Failed to append {} event", event.metric_type))?;

        Ok(conn.last_insert_rowid())
    }

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<MetricEvent>> {
        let mut sql = String::from(
            "SELECT id, metric_type, subject_id, actor_id, value, occurred_at, category, artist_id, metadata
             FROM metric_event WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(metric_type) = filter.metric_type {
            sql.push_str(" AND metric_type = ?");
            args.push(Box::new(metric_type.as_str().to_string()));
        }
        if let Some(subject_id) = &filter.subject_id {
            sql.push_str(" AND subject_id = ?");
            args.push(Box::new(subject_id.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND occurred_at >= ?");
            args.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND occurred_at <= ?");
            args.push(Box::new(until));
        }
        sql.push_str(" ORDER BY occurred_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_event)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query events")?;
        Ok(events)
    }

    fn bucket_events(
        &self,
        metric_type: MetricType,
        bucket_format: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<MetricBucket>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT strftime(?1, occurred_at, 'unixepoch') AS bucket,
                    COUNT(*),
                    COALESCE(SUM(value), 0)
             FROM metric_event
             WHERE metric_type = ?2 AND occurred_at BETWEEN ?3 AND ?4
             GROUP BY bucket
             ORDER BY bucket ASC",
        )?;
        let buckets = stmt
            .query_map(
                params![bucket_format, metric_type.as_str(), start_ts, end_ts],
                |row| {
                    Ok(MetricBucket {
                        bucket: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                        total_value: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(buckets)
    }

    fn top_subjects(
        &self,
        metric_type: MetricType,
        since_ts: i64,
        limit: usize,
        order_by_value: bool,
    ) -> Result<Vec<TopSubject>> {
        let order = if order_by_value {
            "total_value"
        } else {
            "event_count"
        };
        let sql = format!(
            "SELECT subject_id,
                    COUNT(*) AS event_count,
                    COALESCE(SUM(value), 0) AS total_value,
                    MAX(occurred_at) AS last_activity
             FROM metric_event
             WHERE metric_type = ?1 AND occurred_at >= ?2 AND subject_id != ''
             GROUP BY subject_id
             ORDER BY {} DESC, last_activity DESC, subject_id ASC
             LIMIT ?3",
            order
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let subjects = stmt
            .query_map(
                params![metric_type.as_str(), since_ts, limit as i64],
                row_to_top_subject,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    fn top_linked_artists(
        &self,
        metric_type: MetricType,
        since_ts: i64,
        limit: usize,
        order_by_value: bool,
    ) -> Result<Vec<TopSubject>> {
        let order = if order_by_value {
            "total_value"
        } else {
            "event_count"
        };
        let sql = format!(
            "SELECT artist_id,
                    COUNT(*) AS event_count,
                    COALESCE(SUM(value), 0) AS total_value,
                    MAX(occurred_at) AS last_activity
             FROM metric_event
             WHERE metric_type = ?1 AND occurred_at >= ?2 AND artist_id IS NOT NULL
             GROUP BY artist_id
             ORDER BY {} DESC, last_activity DESC, artist_id ASC
             LIMIT ?3",
            order
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let artists = stmt
            .query_map(
                params![metric_type.as_str(), since_ts, limit as i64],
                row_to_top_subject,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(artists)
    }

    fn collect_candidate_metrics(
        &self,
        entity: EntityClass,
        since_ts: i64,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SubjectActivity>> {
        // The grouping key depends on the entity class: artworks group by
        // the event subject, artists merge direct profile views with the
        // artist link carried on artwork events, collections group by the
        // category column.
        let (key_expr, type_filter) = match entity {
            EntityClass::Artwork => (
                "subject_id",
                "metric_type IN ('artwork_view', 'artwork_sale')",
            ),
            EntityClass::Artist => (
                "CASE WHEN metric_type = 'artist_view' THEN subject_id ELSE artist_id END",
                "metric_type IN ('artist_view', 'artwork_view', 'artwork_sale')",
            ),
            EntityClass::Collection => (
                "category",
                "metric_type IN ('artwork_view', 'artwork_sale')",
            ),
        };

        let mut sql = format!(
            "SELECT {key} AS entity_id,
                    SUM(CASE WHEN metric_type IN ('artwork_view', 'artist_view') THEN 1 ELSE 0 END),
                    SUM(CASE WHEN metric_type = 'artwork_sale' THEN 1 ELSE 0 END),
                    COALESCE(SUM(CASE WHEN metric_type = 'artwork_sale' THEN value ELSE 0 END), 0),
                    MAX(occurred_at)
             FROM metric_event
             WHERE {types} AND occurred_at >= ?",
            key = key_expr,
            types = type_filter,
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(since_ts)];
        if let Some(category) = category {
            sql.push_str(" AND category = ?");
            args.push(Box::new(category.to_string()));
        }
        sql.push_str(
            " GROUP BY entity_id
              HAVING entity_id IS NOT NULL AND entity_id != ''
              ORDER BY COUNT(*) DESC, entity_id ASC
              LIMIT ?",
        );
        args.push(Box::new(limit as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(SubjectActivity {
                    subject_id: row.get(0)?,
                    views: row.get::<_, i64>(1)? as u64,
                    sales: row.get::<_, i64>(2)? as u64,
                    revenue: row.get(3)?,
                    last_activity_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect candidate metrics")?;
        Ok(candidates)
    }

    fn insert_aggregate_if_absent(&self, aggregate: &DailyAggregate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // INSERT OR IGNORE rides the (metric_type, date) unique constraint:
        // of two concurrent aggregation runs exactly one inserts, the other
        // sees zero changed rows and treats the day as already aggregated.
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO daily_aggregate (metric_type, date, count, total_value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    aggregate.metric_type.as_str(),
                    aggregate.date.to_string(),
                    aggregate.count as i64,
                    aggregate.total_value,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert aggregate for {} on {}",
                    aggregate.metric_type, aggregate.date
                )
            })?;
        Ok(inserted == 1)
    }

    fn get_aggregates(
        &self,
        metric_type: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT metric_type, date, count, total_value
             FROM daily_aggregate
             WHERE metric_type = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC",
        )?;
        let aggregates = stmt
            .query_map(
                params![metric_type.as_str(), start.to_string(), end.to_string()],
                row_to_aggregate,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aggregates)
    }

    fn get_aggregates_for_date(&self, date: NaiveDate) -> Result<Vec<DailyAggregate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT metric_type, date, count, total_value
             FROM daily_aggregate
             WHERE date = ?1
             ORDER BY metric_type ASC",
        )?;
        let aggregates = stmt
            .query_map(params![date.to_string()], row_to_aggregate)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aggregates)
    }

    fn summarize_events(
        &self,
        metric_type: MetricType,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<(u64, f64)> {
        let conn = self.conn.lock().unwrap();
        let (count, total): (i64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(value), 0)
             FROM metric_event
             WHERE metric_type = ?1 AND occurred_at BETWEEN ?2 AND ?3",
            params![metric_type.as_str(), start_ts, end_ts],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as u64, total))
    }

    fn increment_subject_counter(
        &self,
        subject_id: &str,
        counter: &str,
        delta: f64,
    ) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "INSERT INTO subject_counter (subject_id, counter, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (subject_id, counter)
                 DO UPDATE SET value = value + excluded.value,
                               updated = cast(strftime('%s','now') as int)
                 RETURNING value",
                params![subject_id, counter, delta],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to bump counter {} for {}", counter, subject_id))?;
        Ok(value)
    }

    fn get_subject_counter(&self, subject_id: &str, counter: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM subject_counter WHERE subject_id = ?1 AND counter = ?2",
                params![subject_id, counter],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        Ok(value)
    }

    fn quality_scores(&self, subject_ids: &[String]) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT score FROM quality_score WHERE subject_id = ?1")?;
        let mut scores = HashMap::new();
        for subject_id in subject_ids {
            let score: Option<f64> = stmt
                .query_row(params![subject_id], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })?;
            if let Some(score) = score {
                scores.insert(subject_id.clone(), score);
            }
        }
        Ok(scores)
    }

    fn set_quality_score(&self, subject_id: &str, score: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quality_score (subject_id, score)
             VALUES (?1, ?2)
             ON CONFLICT (subject_id)
             DO UPDATE SET score = excluded.score,
                           updated = cast(strftime('%s','now') as int)",
            params![subject_id, score],
        )?;
        Ok(())
    }
}
