mod engine;
mod trending;
mod weights;

pub(crate) use engine::entity_from_activity;
pub use engine::{RankingEngine, RankingRequest};
pub use trending::TrendingEngine;
pub use weights::RankingWeights;

use serde::{Deserialize, Serialize};

/// Kind of entity a ranking is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Artwork,
    Artist,
    Collection,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Artwork => "artwork",
            EntityClass::Artist => "artist",
            EntityClass::Collection => "collection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "artwork" => Some(EntityClass::Artwork),
            "artist" => Some(EntityClass::Artist),
            "collection" => Some(EntityClass::Collection),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookback window for rankings and metric summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RankingPeriod {
    #[serde(rename = "7days")]
    SevenDays,
    #[serde(rename = "30days")]
    ThirtyDays,
    #[serde(rename = "90days")]
    NinetyDays,
    #[serde(rename = "alltime")]
    AllTime,
}

impl RankingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingPeriod::SevenDays => "7days",
            RankingPeriod::ThirtyDays => "30days",
            RankingPeriod::NinetyDays => "90days",
            RankingPeriod::AllTime => "alltime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "7days" => Some(RankingPeriod::SevenDays),
            "30days" => Some(RankingPeriod::ThirtyDays),
            "90days" => Some(RankingPeriod::NinetyDays),
            "alltime" => Some(RankingPeriod::AllTime),
            _ => None,
        }
    }

    /// Lookback in days. "All time" is capped at ten years so the window
    /// arithmetic stays finite.
    pub fn days(&self) -> u32 {
        match self {
            RankingPeriod::SevenDays => 7,
            RankingPeriod::ThirtyDays => 30,
            RankingPeriod::NinetyDays => 90,
            RankingPeriod::AllTime => 3650,
        }
    }
}

impl std::fmt::Display for RankingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-entity inputs to the scoring formula, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawMetrics {
    pub views: u64,
    pub sales: u64,
    pub revenue: f64,
    pub quality: f64,
    pub recency: f64,
    pub last_activity_at: i64,
}

/// One entry in a computed ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEntity {
    pub id: String,
    pub entity: EntityClass,
    pub score: f64,
    pub metrics: RawMetrics,
}
