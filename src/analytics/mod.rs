//! Service facade tying the store, cache, engines and curation adapter
//! together. Everything is handed in at construction, so tests can swap any
//! piece for a fake.

use crate::aggregation::{AggregationReport, DailyAggregationJob};
use crate::curation::CurationAdapter;
use crate::error::{AnalyticsError, Result};
use crate::metrics_store::{
    DailyAggregate, MetricBucket, MetricType, MetricsStore, NewMetricEvent, TopSubject,
};
use crate::query_cache::{CacheKey, QueryCache};
use crate::ranking::{
    EntityClass, RankedEntity, RankingEngine, RankingPeriod, RankingRequest, RankingWeights,
    TrendingEngine,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const COUNTER_VIEWS: &str = "views";
const COUNTER_SALES: &str = "sales";
const COUNTER_REVENUE: &str = "revenue";

/// Service level tunables. Defaults mirror production behavior: computed
/// queries are cached for an hour, trending for half an hour.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsConfig {
    pub cache_ttl: Duration,
    pub trending_cache_ttl: Duration,
    pub query_timeout: Duration,
    pub default_weights: RankingWeights,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            trending_cache_ttl: Duration::from_secs(1800),
            query_timeout: Duration::from_secs(10),
            default_weights: RankingWeights::default(),
        }
    }
}

/// An incoming event before validation. Metadata is a free-form JSON object;
/// the `category` and `artist_id` keys are lifted into their own columns so
/// rankings can filter and join on them.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordEventRequest {
    pub metric_type: MetricType,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub occurred_at: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

/// Time bucketing for metric summaries, with a default lookback per
/// granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Granularity::Daily),
            "weekly" => Some(Granularity::Weekly),
            "monthly" => Some(Granularity::Monthly),
            "yearly" => Some(Granularity::Yearly),
            _ => None,
        }
    }

    fn bucket_format(&self) -> &'static str {
        match self {
            Granularity::Daily => "%Y-%m-%d",
            Granularity::Weekly => "%Y-%W",
            Granularity::Monthly => "%Y-%m",
            Granularity::Yearly => "%Y",
        }
    }

    fn default_lookback(&self) -> Duration {
        match self {
            Granularity::Daily => Duration::from_secs(7 * 86_400),
            Granularity::Weekly => Duration::from_secs(8 * 7 * 86_400),
            Granularity::Monthly => Duration::from_secs(6 * 30 * 86_400),
            Granularity::Yearly => Duration::from_secs(2 * 365 * 86_400),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SalesLeaderboard {
    pub artworks: Vec<RankedEntity>,
    pub artists: Vec<TopSubject>,
}

pub struct AnalyticsService {
    store: Arc<dyn MetricsStore>,
    cache: QueryCache,
    ranking_engine: RankingEngine,
    trending_engine: TrendingEngine,
    aggregation_job: DailyAggregationJob,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        adapter: Arc<dyn CurationAdapter>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            ranking_engine: RankingEngine::new(Arc::clone(&store), Arc::clone(&adapter)),
            trending_engine: TrendingEngine::new(Arc::clone(&store), Arc::clone(&adapter)),
            aggregation_job: DailyAggregationJob::new(Arc::clone(&store), adapter),
            store,
            cache: QueryCache::new(),
            config,
        }
    }

    /// Validates and persists one event, then bumps the denormalized
    /// counters. Counter updates are best effort: a failure there is logged
    /// and the recorded event stands.
    pub fn record_event(&self, request: RecordEventRequest) -> Result<i64> {
        let value = request.value.unwrap_or(1.0);
        if !value.is_finite() {
            return Err(AnalyticsError::invalid("value must be a finite number"));
        }
        if value < 0.0 {
            return Err(AnalyticsError::invalid("value must not be negative"));
        }
        if request.subject_id.is_empty() && request.metric_type != MetricType::SearchQuery {
            return Err(AnalyticsError::invalid(format!(
                "subject_id is required for {} events",
                request.metric_type
            )));
        }

        let category = metadata_string(&request.metadata, "category")?;
        let artist_id = metadata_string(&request.metadata, "artist_id")?;
        let occurred_at = request.occurred_at.unwrap_or_else(|| Utc::now().timestamp());

        let event = NewMetricEvent {
            metric_type: request.metric_type,
            subject_id: request.subject_id.clone(),
            actor_id: request.actor_id,
            value,
            occurred_at,
            category,
            artist_id: artist_id.clone(),
            metadata: request.metadata,
        };
        let id = self.store.append_event(event)?;
        crate::server::metrics::record_event_recorded(request.metric_type.as_str());

        self.bump_counters(request.metric_type, &request.subject_id, artist_id, value);
        Ok(id)
    }

    fn bump_counters(
        &self,
        metric_type: MetricType,
        subject_id: &str,
        artist_id: Option<String>,
        value: f64,
    ) {
        let mut increments: Vec<(&str, &str, f64)> = Vec::new();
        match metric_type {
            MetricType::ArtworkView | MetricType::ArtistView => {
                increments.push((subject_id, COUNTER_VIEWS, 1.0));
            }
            MetricType::ArtworkSale => {
                increments.push((subject_id, COUNTER_SALES, 1.0));
                increments.push((subject_id, COUNTER_REVENUE, value));
            }
            _ => {}
        }
        if metric_type == MetricType::ArtworkSale {
            if let Some(artist_id) = &artist_id {
                increments.push((artist_id, COUNTER_REVENUE, value));
            }
        }

        for (subject, counter, delta) in increments {
            if let Err(e) = self.store.increment_subject_counter(subject, counter, delta) {
                warn!(subject, counter, error = %e, "Counter update failed");
            }
        }
    }

    /// Time-bucketed counts and value sums for one metric type. The window
    /// defaults to a granularity-appropriate lookback when not given.
    pub fn get_metrics(
        &self,
        metric_type: MetricType,
        granularity: Granularity,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Arc<Vec<MetricBucket>>> {
        if let (Some(since), Some(until)) = (since, until) {
            if since > until {
                return Err(AnalyticsError::invalid("since must not be after until"));
            }
        }

        // Defaulted bounds stay out of the key; resolving them here would
        // mint a fresh key every second and the cache would never hit.
        let key = CacheKey::new("get_metrics")
            .param("metric_type", metric_type)
            .param("granularity", granularity.bucket_format())
            .opt_param("since", since)
            .opt_param("until", until);
        self.cached(key, self.config.cache_ttl, || {
            let until = until.unwrap_or_else(|| Utc::now().timestamp());
            let since =
                since.unwrap_or_else(|| until - granularity.default_lookback().as_secs() as i64);
            if since > until {
                return Err(AnalyticsError::invalid("since must not be after until"));
            }
            Ok(self
                .store
                .bucket_events(metric_type, granularity.bucket_format(), since, until)?)
        })
    }

    /// Most active items for one metric type. Sales are ordered by summed
    /// value, everything else by event count. Asking for artists on an
    /// artwork metric groups by the linked artist instead of the subject.
    pub fn get_top(
        &self,
        metric_type: MetricType,
        item_type: EntityClass,
        count: usize,
        period: RankingPeriod,
    ) -> Result<Arc<Vec<TopSubject>>> {
        if count == 0 {
            return Err(AnalyticsError::invalid("count must be greater than zero"));
        }
        let since_ts = Utc::now().timestamp() - period.days() as i64 * 86_400;
        let by_value = metric_type == MetricType::ArtworkSale;
        let by_linked_artist =
            item_type == EntityClass::Artist && metric_type != MetricType::ArtistView;

        let key = CacheKey::new("get_top")
            .param("metric_type", metric_type)
            .param("item_type", item_type)
            .param("count", count)
            .param("period", period);
        self.cached(key, self.config.cache_ttl, || {
            if by_linked_artist {
                Ok(self
                    .store
                    .top_linked_artists(metric_type, since_ts, count, by_value)?)
            } else {
                Ok(self
                    .store
                    .top_subjects(metric_type, since_ts, count, by_value)?)
            }
        })
    }

    pub fn get_rankings(
        &self,
        entity: EntityClass,
        period: RankingPeriod,
        count: usize,
        category: Option<String>,
        weights: Option<RankingWeights>,
    ) -> Result<Arc<Vec<RankedEntity>>> {
        let request = RankingRequest {
            entity,
            period,
            count,
            category,
            weights: weights.unwrap_or(self.config.default_weights),
        };
        let key = CacheKey::new("get_rankings")
            .param("entity", entity)
            .param("period", period)
            .param("count", count)
            .opt_param("category", request.category.as_deref())
            .param("weights", format!("{:?}", request.weights));
        let deadline = Instant::now() + self.config.query_timeout;
        self.cached(key, self.config.cache_ttl, || {
            self.ranking_engine.rank(&request, Utc::now(), Some(deadline))
        })
    }

    pub fn get_trending(
        &self,
        entity: EntityClass,
        count: usize,
        category: Option<String>,
    ) -> Result<Arc<Vec<RankedEntity>>> {
        let key = CacheKey::new("get_trending")
            .param("entity", entity)
            .param("count", count)
            .opt_param("category", category.as_deref());
        let deadline = Instant::now() + self.config.query_timeout;
        self.cached(key, self.config.trending_cache_ttl, || {
            self.trending_engine.trending(
                entity,
                count,
                category.as_deref(),
                Utc::now(),
                Some(deadline),
            )
        })
    }

    /// Top selling artworks by revenue, plus the artists behind the window's
    /// sales.
    pub fn get_sales_leaderboard(
        &self,
        count: usize,
        category: Option<String>,
        period: RankingPeriod,
    ) -> Result<Arc<SalesLeaderboard>> {
        if count == 0 {
            return Err(AnalyticsError::invalid("count must be greater than zero"));
        }
        let since_ts = Utc::now().timestamp() - period.days() as i64 * 86_400;

        let key = CacheKey::new("get_sales_leaderboard")
            .param("count", count)
            .opt_param("category", category.as_deref())
            .param("period", period);
        self.cached(key, self.config.cache_ttl, || {
            let candidates = self.store.collect_candidate_metrics(
                EntityClass::Artwork,
                since_ts,
                category.as_deref(),
                count * 2,
            )?;
            let now = Utc::now();
            let mut artworks: Vec<RankedEntity> = candidates
                .into_iter()
                .filter(|c| c.sales > 0)
                .map(|c| {
                    let mut entry = crate::ranking::entity_from_activity(
                        EntityClass::Artwork,
                        c,
                        0.0,
                        now,
                        period.days() as i64,
                    );
                    entry.score = entry.metrics.revenue;
                    entry
                })
                .collect();
            artworks.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| b.metrics.last_activity_at.cmp(&a.metrics.last_activity_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            artworks.truncate(count);

            let artists =
                self.store
                    .top_linked_artists(MetricType::ArtworkSale, since_ts, count, true)?;
            Ok(SalesLeaderboard { artworks, artists })
        })
    }

    /// Stored daily rollups for one metric type, ascending by date. The
    /// window defaults to the trailing thirty days.
    pub fn get_daily_aggregates(
        &self,
        metric_type: MetricType,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Arc<Vec<DailyAggregate>>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AnalyticsError::invalid("start must not be after end"));
            }
        }

        let key = CacheKey::new("get_daily_aggregates")
            .param("metric_type", metric_type)
            .opt_param("start", start)
            .opt_param("end", end);
        self.cached(key, self.config.cache_ttl, || {
            let end = end.unwrap_or_else(|| Utc::now().date_naive());
            let start = start
                .unwrap_or_else(|| end.checked_sub_days(Days::new(30)).unwrap_or(NaiveDate::MIN));
            if start > end {
                return Err(AnalyticsError::invalid("start must not be after end"));
            }
            Ok(self.store.get_aggregates(metric_type, start, end)?)
        })
    }

    /// Triggers the rollup for `date` and clears cached query results, since
    /// aggregate-backed answers may have changed.
    pub fn run_daily_aggregation(&self, date: NaiveDate) -> Result<AggregationReport> {
        let report = self.aggregation_job.run(date)?;
        self.cache.invalidate_all();
        Ok(report)
    }

    pub fn set_quality_score(&self, subject_id: &str, score: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&score) {
            return Err(AnalyticsError::invalid(
                "quality score must be between 0.0 and 1.0",
            ));
        }
        if subject_id.is_empty() {
            return Err(AnalyticsError::invalid("subject_id is required"));
        }
        self.store.set_quality_score(subject_id, score)?;
        Ok(())
    }

    pub fn default_weights(&self) -> RankingWeights {
        self.config.default_weights
    }

    pub fn subject_counter(&self, subject_id: &str, counter: &str) -> Result<Option<f64>> {
        Ok(self.store.get_subject_counter(subject_id, counter)?)
    }

    fn cached<T, F>(&self, key: CacheKey, ttl: Duration, compute: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        self.cache.get_or_compute(key, ttl, compute)
    }
}

fn metadata_string(
    metadata: &BTreeMap<String, JsonValue>,
    key: &str,
) -> Result<Option<String>> {
    match metadata.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        Some(JsonValue::String(_)) => Ok(None),
        Some(other) => Err(AnalyticsError::invalid(format!(
            "metadata key '{}' must be a string, got {}",
            key, other
        ))),
    }
}
