use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

// =============================================================================
// Metric events
// =============================================================================

/// Kind of marketplace event being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// An artwork page was viewed.
    ArtworkView,
    /// An artist profile was viewed.
    ArtistView,
    /// An artwork was sold; the event value carries the sale amount.
    ArtworkSale,
    /// A user interacted with one of the AI assistants.
    AiInteraction,
    /// An artwork was minted as an NFT.
    NftMint,
    /// A search was performed. Has no subject.
    SearchQuery,
}

/// All tracked types, in the order the daily aggregation processes them.
pub const ALL_METRIC_TYPES: [MetricType; 6] = [
    MetricType::ArtworkView,
    MetricType::ArtistView,
    MetricType::ArtworkSale,
    MetricType::AiInteraction,
    MetricType::NftMint,
    MetricType::SearchQuery,
];

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ArtworkView => "artwork_view",
            MetricType::ArtistView => "artist_view",
            MetricType::ArtworkSale => "artwork_sale",
            MetricType::AiInteraction => "ai_interaction",
            MetricType::NftMint => "nft_mint",
            MetricType::SearchQuery => "search_query",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "artwork_view" => Some(MetricType::ArtworkView),
            "artist_view" => Some(MetricType::ArtistView),
            "artwork_sale" => Some(MetricType::ArtworkSale),
            "ai_interaction" => Some(MetricType::AiInteraction),
            "nft_mint" => Some(MetricType::NftMint),
            "search_query" => Some(MetricType::SearchQuery),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable recorded fact about a single marketplace interaction.
///
/// Events are append-only: once written they are never mutated or deleted,
/// and `occurred_at` is never retroactively altered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub id: i64,
    pub metric_type: MetricType,
    /// The artwork/artist/etc. the event is about. Empty for subject-less
    /// types such as `search_query`.
    pub subject_id: String,
    /// The user who triggered the event; `None` for anonymous traffic.
    pub actor_id: Option<String>,
    pub value: f64,
    /// Unix timestamp (UTC seconds).
    pub occurred_at: i64,
    /// Well-known metadata key lifted into a column at the recorder boundary.
    pub category: Option<String>,
    /// Artist linked to the subject, when known (e.g. the creator of a sold
    /// artwork). Lifted from metadata like `category`.
    pub artist_id: Option<String>,
    /// Remaining per-type metadata, stored as JSON.
    pub metadata: BTreeMap<String, JsonValue>,
}

/// Filter for raw event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub metric_type: Option<MetricType>,
    pub subject_id: Option<String>,
    /// Inclusive lower bound on `occurred_at`.
    pub since: Option<i64>,
    /// Inclusive upper bound on `occurred_at`.
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

// =============================================================================
// Aggregates and read-side rows
// =============================================================================

/// Per-day summary of one metric type, materialized by the aggregation job.
/// Unique on (metric_type, date); written at most once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub metric_type: MetricType,
    pub date: NaiveDate,
    pub count: u64,
    pub total_value: f64,
}

/// One time bucket of a metrics query (`GET /metrics/{type}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBucket {
    /// Bucket label, e.g. "2024-01-05" for daily or "2024-01" for monthly.
    pub bucket: String,
    pub count: u64,
    pub total_value: f64,
}

/// One subject row of a top-items query, grouped and ordered by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSubject {
    pub subject_id: String,
    pub count: u64,
    pub total_value: f64,
    pub last_activity_at: i64,
}

/// Raw in-window activity of one ranking candidate, as returned by the
/// candidate retrieval query. Quality and recency are filled in by the
/// ranking engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectActivity {
    pub subject_id: String,
    pub views: u64,
    pub sales: u64,
    pub revenue: f64,
    pub last_activity_at: i64,
}
