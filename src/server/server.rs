use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{log_requests, metrics::metrics_handler, state::*, RequestsLoggingLevel, ServerConfig};
use crate::analytics::{AnalyticsService, Granularity, RecordEventRequest};
use crate::error::AnalyticsError;
use crate::metrics_store::MetricType;
use crate::ranking::{EntityClass, RankingPeriod, RankingWeights};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn error_response(err: AnalyticsError) -> Response {
    let status = match &err {
        AnalyticsError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        AnalyticsError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        AnalyticsError::Storage(e) => {
            error!("Storage error serving request: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = Json(serde_json::json!({ "error": err.to_string() }));
    (status, body).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    error_response(AnalyticsError::invalid(message.into()))
}

/// Runs a synchronous service call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AnalyticsError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(error_response),
        Err(e) => {
            error!("Service task panicked: {:?}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

#[derive(Serialize)]
struct RecordedEventResponse {
    id: i64,
}

async fn record_event(
    State(analytics): State<GuardedAnalyticsService>,
    Json(body): Json<RecordEventRequest>,
) -> Response {
    match blocking(move || analytics.record_event(body)).await {
        Ok(id) => (StatusCode::CREATED, Json(RecordedEventResponse { id })).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct MetricsQuery {
    granularity: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
}

async fn get_metrics(
    State(analytics): State<GuardedAnalyticsService>,
    Path(metric_type): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let metric_type = match MetricType::parse(&metric_type) {
        Some(metric_type) => metric_type,
        None => return bad_request(format!("unknown metric type '{}'", metric_type)),
    };
    let granularity = match &query.granularity {
        None => Granularity::Daily,
        Some(s) => match Granularity::parse(s) {
            Some(granularity) => granularity,
            None => return bad_request(format!("unknown granularity '{}'", s)),
        },
    };

    match blocking(move || analytics.get_metrics(metric_type, granularity, query.since, query.until))
        .await
    {
        Ok(buckets) => Json(buckets.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct TopQuery {
    item_type: Option<String>,
    count: Option<usize>,
    period: Option<String>,
}

async fn get_top(
    State(analytics): State<GuardedAnalyticsService>,
    Path(metric_type): Path<String>,
    Query(query): Query<TopQuery>,
) -> Response {
    let metric_type = match MetricType::parse(&metric_type) {
        Some(metric_type) => metric_type,
        None => return bad_request(format!("unknown metric type '{}'", metric_type)),
    };
    let item_type = match parse_entity(query.item_type.as_deref()) {
        Ok(item_type) => item_type,
        Err(response) => return response,
    };
    let period = match parse_period(query.period.as_deref()) {
        Ok(period) => period,
        Err(response) => return response,
    };
    let count = query.count.unwrap_or(10);

    match blocking(move || analytics.get_top(metric_type, item_type, count, period)).await {
        Ok(top) => Json(top.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct RankingsQuery {
    entity: Option<String>,
    period: Option<String>,
    count: Option<usize>,
    category: Option<String>,
    // Optional per-request weight overrides
    weight_views: Option<f64>,
    weight_sales: Option<f64>,
    weight_revenue: Option<f64>,
    weight_quality: Option<f64>,
    weight_recency: Option<f64>,
}

impl RankingsQuery {
    fn weights(&self, defaults: RankingWeights) -> Option<RankingWeights> {
        let overridden = self.weight_views.is_some()
            || self.weight_sales.is_some()
            || self.weight_revenue.is_some()
            || self.weight_quality.is_some()
            || self.weight_recency.is_some();
        if !overridden {
            return None;
        }
        Some(RankingWeights {
            views: self.weight_views.unwrap_or(defaults.views),
            sales: self.weight_sales.unwrap_or(defaults.sales),
            revenue: self.weight_revenue.unwrap_or(defaults.revenue),
            quality: self.weight_quality.unwrap_or(defaults.quality),
            recency: self.weight_recency.unwrap_or(defaults.recency),
        })
    }
}

async fn get_rankings(
    State(state): State<ServerState>,
    Query(query): Query<RankingsQuery>,
) -> Response {
    let entity = match parse_entity(query.entity.as_deref()) {
        Ok(entity) => entity,
        Err(response) => return response,
    };
    let period = match parse_period(query.period.as_deref()) {
        Ok(period) => period,
        Err(response) => return response,
    };
    let count = query.count.unwrap_or(10);
    let analytics = state.analytics.clone();
    let weights = query.weights(analytics.default_weights());
    let category = query.category.clone();

    match blocking(move || analytics.get_rankings(entity, period, count, category, weights)).await {
        Ok(rankings) => Json(rankings.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct TrendingQuery {
    entity: Option<String>,
    count: Option<usize>,
    category: Option<String>,
}

async fn get_trending(
    State(analytics): State<GuardedAnalyticsService>,
    Query(query): Query<TrendingQuery>,
) -> Response {
    let entity = match parse_entity(query.entity.as_deref()) {
        Ok(entity) => entity,
        Err(response) => return response,
    };
    let count = query.count.unwrap_or(10);
    let category = query.category.clone();

    match blocking(move || analytics.get_trending(entity, count, category)).await {
        Ok(trending) => Json(trending.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct LeaderboardQuery {
    count: Option<usize>,
    category: Option<String>,
    period: Option<String>,
}

async fn get_leaderboard(
    State(analytics): State<GuardedAnalyticsService>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let period = match parse_period(query.period.as_deref()) {
        Ok(period) => period,
        Err(response) => return response,
    };
    let count = query.count.unwrap_or(10);
    let category = query.category.clone();

    match blocking(move || analytics.get_sales_leaderboard(count, category, period)).await {
        Ok(leaderboard) => Json(leaderboard.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug)]
struct AggregatesQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

async fn get_aggregates(
    State(analytics): State<GuardedAnalyticsService>,
    Path(metric_type): Path<String>,
    Query(query): Query<AggregatesQuery>,
) -> Response {
    let metric_type = match MetricType::parse(&metric_type) {
        Some(metric_type) => metric_type,
        None => return bad_request(format!("unknown metric type '{}'", metric_type)),
    };

    match blocking(move || analytics.get_daily_aggregates(metric_type, query.start, query.end))
        .await
    {
        Ok(aggregates) => Json(aggregates.as_ref().clone()).into_response(),
        Err(response) => response,
    }
}

#[derive(Deserialize, Debug, Default)]
struct RunAggregationBody {
    date: Option<NaiveDate>,
}

async fn run_aggregation(
    State(analytics): State<GuardedAnalyticsService>,
    body: Option<Json<RunAggregationBody>>,
) -> Response {
    let date = body
        .and_then(|Json(body)| body.date)
        .unwrap_or_else(yesterday);

    match blocking(move || analytics.run_daily_aggregation(date)).await {
        Ok(report) => Json(report).into_response(),
        Err(response) => response,
    }
}

fn yesterday() -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .expect("date arithmetic")
}

fn parse_entity(s: Option<&str>) -> Result<EntityClass, Response> {
    match s {
        None => Ok(EntityClass::Artwork),
        Some(s) => EntityClass::parse(s)
            .ok_or_else(|| bad_request(format!("unknown entity class '{}'", s))),
    }
}

fn parse_period(s: Option<&str>) -> Result<RankingPeriod, Response> {
    match s {
        None => Ok(RankingPeriod::ThirtyDays),
        Some(s) => RankingPeriod::parse(s)
            .ok_or_else(|| bad_request(format!("unknown period '{}'", s))),
    }
}

pub fn make_app(config: ServerConfig, analytics: Arc<AnalyticsService>) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        analytics,
        hash: env!("GIT_HASH").to_owned(),
    };

    let analytics_routes: Router = Router::new()
        .route("/event", post(record_event))
        .route("/metrics/{type}", get(get_metrics))
        .route("/top/{type}", get(get_top))
        .route("/rankings", get(get_rankings))
        .route("/trending", get(get_trending))
        .route("/leaderboard", get(get_leaderboard))
        .route("/aggregates/{type}", get(get_aggregates))
        .route("/aggregation/run", post(run_aggregation))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .route("/healthz", get(healthz))
        .with_state(state.clone())
        .nest("/v1/analytics", analytics_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(
    analytics: Arc<AnalyticsService>,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    metrics_port: u16,
) -> Result<()> {
    let config = ServerConfig {
        requests_logging_level,
        port,
        metrics_port,
    };
    let app = make_app(config, analytics);

    let metrics_app: Router = Router::new().route("/metrics", get(metrics_handler));
    let metrics_listener =
        tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port)).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!("Metrics server stopped: {:#}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    Ok(axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {:#}", e);
        return;
    }
    info!("Shutdown signal received");
}
