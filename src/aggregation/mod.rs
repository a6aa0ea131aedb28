//! Daily rollup of raw events into one row per metric type per day.
//!
//! The job is idempotent: the unique (metric_type, date) constraint means a
//! re-run, or a concurrent run, leaves the first inserted row untouched.

use crate::curation::CurationAdapter;
use crate::metrics_store::{DailyAggregate, MetricType, MetricsStore, ALL_METRIC_TYPES};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AggregationOutcome {
    Inserted { count: u64, total_value: f64 },
    AlreadyAggregated,
    Failed { error: String },
}

impl AggregationOutcome {
    fn label(&self) -> &'static str {
        match self {
            AggregationOutcome::Inserted { .. } => "inserted",
            AggregationOutcome::AlreadyAggregated => "already_aggregated",
            AggregationOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AggregationReport {
    pub date: NaiveDate,
    pub outcomes: Vec<(MetricType, AggregationOutcome)>,
}

impl AggregationReport {
    pub fn inserted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AggregationOutcome::Inserted { .. }))
            .count()
    }
}

pub struct DailyAggregationJob {
    store: Arc<dyn MetricsStore>,
    adapter: Arc<dyn CurationAdapter>,
}

impl DailyAggregationJob {
    pub fn new(store: Arc<dyn MetricsStore>, adapter: Arc<dyn CurationAdapter>) -> Self {
        Self { store, adapter }
    }

    /// Aggregates all metric types for `date`. Each type is rolled up
    /// independently, so one failing type does not block the others.
    pub fn run(&self, date: NaiveDate) -> Result<AggregationReport> {
        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let day_end = date.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();

        let mut outcomes = Vec::with_capacity(ALL_METRIC_TYPES.len());
        for metric_type in ALL_METRIC_TYPES {
            let outcome = self.aggregate_one(metric_type, date, day_start, day_end);
            if let AggregationOutcome::Failed { error } = &outcome {
                warn!(%metric_type, %date, error, "Aggregation failed for metric type");
            }
            crate::server::metrics::record_aggregation_outcome(
                metric_type.as_str(),
                outcome.label(),
            );
            outcomes.push((metric_type, outcome));
        }

        let report = AggregationReport { date, outcomes };
        info!(
            %date,
            inserted = report.inserted_count(),
            "Daily aggregation run finished"
        );

        self.notify_adapter(date);
        Ok(report)
    }

    fn aggregate_one(
        &self,
        metric_type: MetricType,
        date: NaiveDate,
        day_start: i64,
        day_end: i64,
    ) -> AggregationOutcome {
        let (count, total_value) = match self.store.summarize_events(metric_type, day_start, day_end)
        {
            Ok(summary) => summary,
            Err(e) => {
                return AggregationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        // Zero-event days still get a row, so a gap in the aggregate table
        // means "not yet rolled up" rather than "quiet day".
        let aggregate = DailyAggregate {
            metric_type,
            date,
            count,
            total_value,
        };
        match self.store.insert_aggregate_if_absent(&aggregate) {
            Ok(true) => AggregationOutcome::Inserted { count, total_value },
            Ok(false) => AggregationOutcome::AlreadyAggregated,
            Err(e) => AggregationOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    /// Best effort notification with the day's rows. Adapter failures are
    /// logged and never fail the run.
    fn notify_adapter(&self, date: NaiveDate) {
        let aggregates = match self.store.get_aggregates_for_date(date) {
            Ok(aggregates) => aggregates,
            Err(e) => {
                warn!(%date, error = %e, "Could not load aggregates for adapter notification");
                return;
            }
        };
        if let Err(e) = self.adapter.observe_daily_aggregates(date, &aggregates) {
            warn!(adapter = self.adapter.name(), error = %e, "Adapter rejected daily aggregates");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::{CurationContext, CurationError, NoopCurationAdapter};
    use crate::metrics_store::{NewMetricEvent, SqliteMetricsStore};
    use crate::ranking::RankedEntity;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn sale(value: f64, at: i64) -> NewMetricEvent {
        NewMetricEvent {
            metric_type: MetricType::ArtworkSale,
            subject_id: "a1".to_string(),
            actor_id: None,
            value,
            occurred_at: at,
            category: None,
            artist_id: None,
            metadata: BTreeMap::new(),
        }
    }

    fn jan_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_sales_day_rolls_up_to_one_row() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let day_start = jan_first().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        for value in [100.0, 100.0, 100.0, 100.0] {
            store.append_event(sale(value, day_start + 60)).unwrap();
        }
        let job = DailyAggregationJob::new(
            Arc::clone(&store) as Arc<dyn MetricsStore>,
            Arc::new(NoopCurationAdapter),
        );

        let report = job.run(jan_first()).unwrap();
        assert_eq!(report.inserted_count(), ALL_METRIC_TYPES.len());

        let rows = store.get_aggregates_for_date(jan_first()).unwrap();
        let sales_row = rows
            .iter()
            .find(|r| r.metric_type == MetricType::ArtworkSale)
            .unwrap();
        assert_eq!(sales_row.count, 4);
        assert_eq!(sales_row.total_value, 400.0);
    }

    #[test]
    fn test_rerun_leaves_existing_rows_untouched() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let day_start = jan_first().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        store.append_event(sale(50.0, day_start + 60)).unwrap();
        let job = DailyAggregationJob::new(
            Arc::clone(&store) as Arc<dyn MetricsStore>,
            Arc::new(NoopCurationAdapter),
        );

        job.run(jan_first()).unwrap();
        // A later event lands before the re-run; the stored row must not move.
        store.append_event(sale(999.0, day_start + 120)).unwrap();
        let report = job.run(jan_first()).unwrap();

        let sale_outcome = report
            .outcomes
            .iter()
            .find(|(t, _)| *t == MetricType::ArtworkSale)
            .map(|(_, o)| o.clone())
            .unwrap();
        assert_eq!(sale_outcome, AggregationOutcome::AlreadyAggregated);

        let rows = store.get_aggregates_for_date(jan_first()).unwrap();
        let sales_row = rows
            .iter()
            .find(|r| r.metric_type == MetricType::ArtworkSale)
            .unwrap();
        assert_eq!(sales_row.count, 1);
        assert_eq!(sales_row.total_value, 50.0);
    }

    #[test]
    fn test_zero_event_days_insert_zero_rows() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let job = DailyAggregationJob::new(
            Arc::clone(&store) as Arc<dyn MetricsStore>,
            Arc::new(NoopCurationAdapter),
        );

        let report = job.run(jan_first()).unwrap();
        assert_eq!(report.inserted_count(), ALL_METRIC_TYPES.len());
        assert!(report.outcomes.iter().all(|(_, o)| {
            *o == AggregationOutcome::Inserted {
                count: 0,
                total_value: 0.0,
            }
        }));

        let rows = store.get_aggregates_for_date(jan_first()).unwrap();
        assert_eq!(rows.len(), ALL_METRIC_TYPES.len());
        assert!(rows.iter().all(|r| r.count == 0 && r.total_value == 0.0));
    }

    #[test]
    fn test_events_outside_the_day_are_excluded() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let day_start = jan_first().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        store.append_event(sale(10.0, day_start - 1)).unwrap();
        store.append_event(sale(20.0, day_start)).unwrap();
        store.append_event(sale(30.0, day_start + 86_400)).unwrap();
        let job = DailyAggregationJob::new(
            Arc::clone(&store) as Arc<dyn MetricsStore>,
            Arc::new(NoopCurationAdapter),
        );

        job.run(jan_first()).unwrap();
        let rows = store.get_aggregates_for_date(jan_first()).unwrap();
        let sales_row = rows
            .iter()
            .find(|r| r.metric_type == MetricType::ArtworkSale)
            .unwrap();
        assert_eq!(sales_row.count, 1);
        assert_eq!(sales_row.total_value, 20.0);
    }

    struct RecordingAdapter {
        observed: Mutex<Vec<(NaiveDate, usize)>>,
        fail: bool,
    }

    impl CurationAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        fn curate(
            &self,
            candidates: Vec<RankedEntity>,
            _ctx: &CurationContext,
        ) -> std::result::Result<Vec<RankedEntity>, CurationError> {
            Ok(candidates)
        }

        fn observe_daily_aggregates(
            &self,
            date: NaiveDate,
            aggregates: &[DailyAggregate],
        ) -> std::result::Result<(), CurationError> {
            self.observed.lock().unwrap().push((date, aggregates.len()));
            if self.fail {
                Err(CurationError::new("recording", "backend unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_adapter_sees_the_days_rows() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let day_start = jan_first().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        store.append_event(sale(10.0, day_start + 60)).unwrap();
        let adapter = Arc::new(RecordingAdapter {
            observed: Mutex::new(Vec::new()),
            fail: false,
        });
        let job = DailyAggregationJob::new(store, Arc::clone(&adapter) as Arc<dyn CurationAdapter>);

        job.run(jan_first()).unwrap();
        let observed = adapter.observed.lock().unwrap();
        assert_eq!(observed.as_slice(), &[(jan_first(), ALL_METRIC_TYPES.len())]);
    }

    #[test]
    fn test_adapter_failure_does_not_fail_the_run() {
        let store = Arc::new(SqliteMetricsStore::in_memory().unwrap());
        let day_start = jan_first().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        store.append_event(sale(10.0, day_start + 60)).unwrap();
        let adapter = Arc::new(RecordingAdapter {
            observed: Mutex::new(Vec::new()),
            fail: true,
        });
        let job = DailyAggregationJob::new(
            Arc::clone(&store) as Arc<dyn MetricsStore>,
            Arc::clone(&adapter) as Arc<dyn CurationAdapter>,
        );

        let report = job.run(jan_first()).unwrap();
        assert_eq!(report.inserted_count(), ALL_METRIC_TYPES.len());
        assert_eq!(
            store.get_aggregates_for_date(jan_first()).unwrap().len(),
            ALL_METRIC_TYPES.len()
        );
    }
}
