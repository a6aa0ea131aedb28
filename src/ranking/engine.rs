use super::{EntityClass, RankedEntity, RankingPeriod, RankingWeights, RawMetrics};
use crate::curation::{CurationAdapter, CurationContext};
use crate::error::{AnalyticsError, Result};
use crate::metrics_store::{MetricsStore, SubjectActivity};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Candidate pools are fetched larger than the requested count so that
/// normalization and curation have slack to reorder within.
const OVERSAMPLE_FACTOR: usize = 3;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub entity: EntityClass,
    pub period: RankingPeriod,
    pub count: usize,
    pub category: Option<String>,
    pub weights: RankingWeights,
}

/// Computes weighted rankings over a lookback window.
///
/// The pipeline is: oversampled candidate fetch, per-dimension pool-max
/// normalization, weighted sum, deterministic sort, truncation to the
/// requested count, curation pass over that final list.
pub struct RankingEngine {
    store: Arc<dyn MetricsStore>,
    adapter: Arc<dyn CurationAdapter>,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn MetricsStore>, adapter: Arc<dyn CurationAdapter>) -> Self {
        Self { store, adapter }
    }

    pub fn rank(
        &self,
        request: &RankingRequest,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Vec<RankedEntity>> {
        if request.count == 0 {
            return Err(AnalyticsError::invalid("count must be greater than zero"));
        }
        request.weights.validate()?;

        let lookback_days = request.period.days() as i64;
        let since_ts = now.timestamp() - lookback_days * SECONDS_PER_DAY;

        check_deadline(deadline)?;
        let candidates = self.store.collect_candidate_metrics(
            request.entity,
            since_ts,
            request.category.as_deref(),
            request.count * OVERSAMPLE_FACTOR,
        )?;
        check_deadline(deadline)?;

        let ids: Vec<String> = candidates.iter().map(|c| c.subject_id.clone()).collect();
        let quality = self.store.quality_scores(&ids)?;
        check_deadline(deadline)?;

        let mut pool: Vec<RankedEntity> = candidates
            .into_iter()
            .map(|activity| {
                let quality = quality.get(&activity.subject_id).copied().unwrap_or(0.0);
                entity_from_activity(request.entity, activity, quality, now, lookback_days)
            })
            .collect();

        score_pool(&mut pool, &request.weights.normalized());
        sort_pool(&mut pool);
        // The adapter only sees the final top-N; entities from the
        // oversampled tail never re-enter through curation.
        pool.truncate(request.count);

        let ctx = CurationContext {
            entity: request.entity,
            period: request.period,
            requested_count: request.count,
            category: request.category.clone(),
        };
        let mut curated = apply_curation(self.adapter.as_ref(), pool, &ctx);
        curated.truncate(request.count);
        Ok(curated)
    }
}

pub(super) fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(AnalyticsError::Timeout),
        _ => Ok(()),
    }
}

pub(crate) fn entity_from_activity(
    entity: EntityClass,
    activity: SubjectActivity,
    quality: f64,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> RankedEntity {
    let days_since = (now.timestamp() - activity.last_activity_at) as f64 / SECONDS_PER_DAY as f64;
    let recency = (1.0 - days_since / lookback_days as f64).max(0.0);
    RankedEntity {
        id: activity.subject_id,
        entity,
        score: 0.0,
        metrics: RawMetrics {
            views: activity.views,
            sales: activity.sales,
            revenue: activity.revenue,
            quality,
            recency,
            last_activity_at: activity.last_activity_at,
        },
    }
}

/// Scores every pool entry in place. Each dimension is scaled against the
/// pool maximum, so scores are comparable within one pool only.
fn score_pool(pool: &mut [RankedEntity], weights: &RankingWeights) {
    let max_views = pool.iter().map(|e| e.metrics.views).max().unwrap_or(0) as f64;
    let max_sales = pool.iter().map(|e| e.metrics.sales).max().unwrap_or(0) as f64;
    let max_revenue = pool.iter().map(|e| e.metrics.revenue).fold(0.0, f64::max);
    let max_quality = pool.iter().map(|e| e.metrics.quality).fold(0.0, f64::max);
    let max_recency = pool.iter().map(|e| e.metrics.recency).fold(0.0, f64::max);

    let norm = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };

    for entry in pool {
        let m = &entry.metrics;
        entry.score = weights.views * norm(m.views as f64, max_views)
            + weights.sales * norm(m.sales as f64, max_sales)
            + weights.revenue * norm(m.revenue, max_revenue)
            + weights.quality * norm(m.quality, max_quality)
            + weights.recency * norm(m.recency, max_recency);
    }
}

/// Score descending, then most recent activity, then id. The id tie-break
/// makes equal inputs produce identical output orderings.
pub(super) fn sort_pool(pool: &mut [RankedEntity]) {
    pool.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.metrics.last_activity_at.cmp(&a.metrics.last_activity_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Runs the adapter over the pool. Ids the adapter returns that were not in
/// the pool are dropped, and any adapter error falls back to the engine's
/// own ordering.
pub(super) fn apply_curation(
    adapter: &dyn CurationAdapter,
    pool: Vec<RankedEntity>,
    ctx: &CurationContext,
) -> Vec<RankedEntity> {
    let known_ids: HashSet<String> = pool.iter().map(|e| e.id.clone()).collect();
    match adapter.curate(pool.clone(), ctx) {
        Ok(curated) => {
            let curated: Vec<RankedEntity> = curated
                .into_iter()
                .filter(|e| known_ids.contains(&e.id))
                .collect();
            if curated.is_empty() && !pool.is_empty() {
                warn!(
                    adapter = adapter.name(),
                    "Curation returned no known candidates, keeping engine ordering"
                );
                crate::server::metrics::record_curation_fallback(adapter.name());
                return pool;
            }
            curated
        }
        Err(e) => {
            warn!(
                adapter = adapter.name(),
                error = %e,
                "Curation failed, keeping engine ordering"
            );
            crate::server::metrics::record_curation_fallback(adapter.name());
            pool
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::{CurationError, NoopCurationAdapter};
    use crate::metrics_store::{MetricType, NewMetricEvent, SqliteMetricsStore};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn store_with_events(events: Vec<NewMetricEvent>) -> Arc<SqliteMetricsStore> {
        let store = SqliteMetricsStore::in_memory().unwrap();
        for event in events {
            store.append_event(event).unwrap();
        }
        Arc::new(store)
    }

    fn view(subject: &str, at: i64) -> NewMetricEvent {
        NewMetricEvent {
            metric_type: MetricType::ArtworkView,
            subject_id: subject.to_string(),
            actor_id: None,
            value: 1.0,
            occurred_at: at,
            category: None,
            artist_id: None,
            metadata: BTreeMap::new(),
        }
    }

    fn sale(subject: &str, value: f64, at: i64) -> NewMetricEvent {
        NewMetricEvent {
            metric_type: MetricType::ArtworkSale,
            value,
            ..view(subject, at)
        }
    }

    fn request(count: usize) -> RankingRequest {
        RankingRequest {
            entity: EntityClass::Artwork,
            period: RankingPeriod::SevenDays,
            count,
            category: None,
            weights: RankingWeights::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_more_views_ranks_higher() {
        let base = now().timestamp() - 3600;
        let mut events = Vec::new();
        for i in 0..10 {
            events.push(view("a1", base + i));
        }
        for i in 0..3 {
            events.push(view("a2", base + i));
        }
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        assert_eq!(ranked[0].id, "a1");
        assert_eq!(ranked[1].id, "a2");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_recency_breaks_otherwise_equal_entities() {
        let ts_old = now().timestamp() - 6 * 86_400;
        let ts_new = now().timestamp() - 3600;
        let events = vec![view("old", ts_old), view("new", ts_new)];
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        assert_eq!(ranked[0].id, "new");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_identical_inputs_produce_identical_output() {
        let base = now().timestamp() - 100;
        // Same counts and timestamps, ordering must fall back to id.
        let events = vec![view("b", base), view("a", base), view("c", base)];
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let first = engine.rank(&request(10), now(), None).unwrap();
        let second = engine.rank(&request(10), now(), None).unwrap();
        let first_ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(first_ids, vec!["a", "b", "c"]);
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_zero_count_is_invalid() {
        let engine = RankingEngine::new(
            store_with_events(Vec::new()),
            Arc::new(NoopCurationAdapter),
        );
        let result = engine.rank(&request(0), now(), None);
        assert!(matches!(result, Err(AnalyticsError::InvalidArgument(_))));
    }

    #[test]
    fn test_empty_pool_yields_empty_ranking() {
        let engine = RankingEngine::new(
            store_with_events(Vec::new()),
            Arc::new(NoopCurationAdapter),
        );
        let ranked = engine.rank(&request(5), now(), None).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_result_truncated_to_requested_count() {
        let base = now().timestamp() - 100;
        let events = (0..8).map(|i| view(&format!("a{}", i), base)).collect();
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let ranked = engine.rank(&request(3), now(), None).unwrap();
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let engine = RankingEngine::new(
            store_with_events(vec![view("a1", now().timestamp() - 100)]),
            Arc::new(NoopCurationAdapter),
        );
        let deadline = Instant::now() - Duration::from_millis(1);
        let result = engine.rank(&request(5), now(), Some(deadline));
        assert!(matches!(result, Err(AnalyticsError::Timeout)));
    }

    struct ReversingAdapter;

    impl CurationAdapter for ReversingAdapter {
        fn name(&self) -> &str {
            "reversing"
        }

        fn curate(
            &self,
            mut candidates: Vec<RankedEntity>,
            _ctx: &CurationContext,
        ) -> std::result::Result<Vec<RankedEntity>, CurationError> {
            candidates.reverse();
            Ok(candidates)
        }
    }

    #[test]
    fn test_adapter_can_reorder_pool() {
        let base = now().timestamp() - 100;
        let events = vec![view("a1", base), view("a1", base), view("a2", base)];
        let engine = RankingEngine::new(store_with_events(events), Arc::new(ReversingAdapter));

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        assert_eq!(ranked[0].id, "a2");
    }

    #[test]
    fn test_adapter_only_sees_the_final_top_n() {
        let base = now().timestamp() - 100;
        // a1 > a2 > a3 > a4 by view count.
        let mut events = Vec::new();
        for (subject, views) in [("a1", 8), ("a2", 6), ("a3", 4), ("a4", 2)] {
            for i in 0..views {
                events.push(view(subject, base + i));
            }
        }
        let engine = RankingEngine::new(store_with_events(events), Arc::new(ReversingAdapter));

        let ranked = engine.rank(&request(2), now(), None).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
        // The adapter may reorder the top two but can never pull the
        // oversampled tail (a3, a4) into the result.
        assert_eq!(ids, vec!["a2", "a1"]);
    }

    #[test]
    fn test_raising_a_weight_never_demotes_its_strongest_candidate() {
        let base = now().timestamp() - 100;
        let mut events = Vec::new();
        for i in 0..10 {
            events.push(view("viewed", base + i));
        }
        events.push(view("sold", base));
        events.push(sale("sold", 500.0, base));
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let position_of = |ranked: &[RankedEntity], id: &str| {
            ranked.iter().position(|e| e.id == id).unwrap()
        };

        let mut weights = RankingWeights::default();
        let mut previous = {
            let mut req = request(10);
            req.weights = weights;
            position_of(&engine.rank(&req, now(), None).unwrap(), "viewed")
        };
        for views_weight in [40.0, 80.0, 160.0] {
            weights.views = views_weight;
            let mut req = request(10);
            req.weights = weights;
            let current = position_of(&engine.rank(&req, now(), None).unwrap(), "viewed");
            assert!(
                current <= previous,
                "views weight {} demoted the most viewed candidate from {} to {}",
                views_weight,
                previous,
                current
            );
            previous = current;
        }
    }

    struct ForeignIdAdapter;

    impl CurationAdapter for ForeignIdAdapter {
        fn name(&self) -> &str {
            "foreign"
        }

        fn curate(
            &self,
            mut candidates: Vec<RankedEntity>,
            _ctx: &CurationContext,
        ) -> std::result::Result<Vec<RankedEntity>, CurationError> {
            let mut invented = candidates[0].clone();
            invented.id = "not-a-candidate".to_string();
            candidates.insert(0, invented);
            Ok(candidates)
        }
    }

    #[test]
    fn test_foreign_ids_from_adapter_are_dropped() {
        let base = now().timestamp() - 100;
        let engine = RankingEngine::new(
            store_with_events(vec![view("a1", base)]),
            Arc::new(ForeignIdAdapter),
        );

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a1"]);
    }

    struct FailingAdapter;

    impl CurationAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        fn curate(
            &self,
            _candidates: Vec<RankedEntity>,
            _ctx: &CurationContext,
        ) -> std::result::Result<Vec<RankedEntity>, CurationError> {
            Err(CurationError::new("failing", "upstream offline"))
        }
    }

    #[test]
    fn test_adapter_failure_falls_back_to_engine_ordering() {
        let base = now().timestamp() - 100;
        let events = vec![view("a1", base), view("a1", base), view("a2", base)];
        let engine = RankingEngine::new(store_with_events(events), Arc::new(FailingAdapter));

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        assert_eq!(ranked[0].id, "a1");
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_sales_and_revenue_outweigh_views_with_default_weights() {
        let base = now().timestamp() - 100;
        let mut events = vec![view("viewed", base), view("viewed", base), view("viewed", base)];
        events.push(view("sold", base));
        events.push(sale("sold", 500.0, base));
        let engine = RankingEngine::new(store_with_events(events), Arc::new(NoopCurationAdapter));

        let ranked = engine.rank(&request(10), now(), None).unwrap();
        assert_eq!(ranked[0].id, "sold");
    }
}
