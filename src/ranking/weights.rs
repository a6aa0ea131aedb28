use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Relative weights of the five scoring dimensions.
///
/// Weights are relative, not percentages: they are normalized by their sum
/// before scoring, so {20, 25, 15, 15, 5} and {0.25, 0.3125, ...} produce
/// the same ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub views: f64,
    pub sales: f64,
    pub revenue: f64,
    pub quality: f64,
    pub recency: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            views: 20.0,
            sales: 25.0,
            revenue: 15.0,
            quality: 15.0,
            recency: 5.0,
        }
    }
}

impl RankingWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [
            ("views", self.views),
            ("sales", self.sales),
            ("revenue", self.revenue),
            ("quality", self.quality),
            ("recency", self.recency),
        ];
        for (name, weight) in all {
            if !weight.is_finite() || weight < 0.0 {
                return Err(AnalyticsError::invalid(format!(
                    "weight '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.sum() <= 0.0 {
            return Err(AnalyticsError::invalid("weights must not all be zero"));
        }
        Ok(())
    }

    fn sum(&self) -> f64 {
        self.views + self.sales + self.revenue + self.quality + self.recency
    }

    /// Weights scaled to sum to 1.0. Callers validate first.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        Self {
            views: self.views / sum,
            sales: self.sales / sum,
            revenue: self.revenue / sum,
            quality: self.quality / sum,
            recency: self.recency / sum,
        }
    }
}
