use super::engine::{apply_curation, check_deadline, sort_pool, entity_from_activity};
use super::{EntityClass, RankedEntity, RankingPeriod};
use crate::curation::{CurationAdapter, CurationContext};
use crate::error::{AnalyticsError, Result};
use crate::metrics_store::MetricsStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Trending always looks at the last seven days, whatever period the
/// weighted rankings use.
const TRENDING_PERIOD: RankingPeriod = RankingPeriod::SevenDays;

const OVERSAMPLE_FACTOR: usize = 2;

/// Trending is a simpler signal than the weighted rankings: the score is the
/// raw activity count in the window, ties broken by most recent activity.
pub struct TrendingEngine {
    store: Arc<dyn MetricsStore>,
    adapter: Arc<dyn CurationAdapter>,
}

impl TrendingEngine {
    pub fn new(store: Arc<dyn MetricsStore>, adapter: Arc<dyn CurationAdapter>) -> Self {
        Self { store, adapter }
    }

    pub fn trending(
        &self,
        entity: EntityClass,
        count: usize,
        category: Option<&str>,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Vec<RankedEntity>> {
        if count == 0 {
            return Err(AnalyticsError::invalid("count must be greater than zero"));
        }

        let lookback_days = TRENDING_PERIOD.days() as i64;
        let since_ts = now.timestamp() - lookback_days * 86_400;

        check_deadline(deadline)?;
        let candidates = self.store.collect_candidate_metrics(
            entity,
            since_ts,
            category,
            count * OVERSAMPLE_FACTOR,
        )?;
        check_deadline(deadline)?;

        let mut pool: Vec<RankedEntity> = candidates
            .into_iter()
            .map(|activity| {
                let mut entry = entity_from_activity(entity, activity, 0.0, now, lookback_days);
                entry.score = (entry.metrics.views + entry.metrics.sales) as f64;
                entry
            })
            .collect();
        sort_pool(&mut pool);

        let ctx = CurationContext {
            entity,
            period: TRENDING_PERIOD,
            requested_count: count,
            category: category.map(str::to_string),
        };
        let mut curated = apply_curation(self.adapter.as_ref(), pool, &ctx);
        curated.truncate(count);
        Ok(curated)
    }
}
