//! Pluggable curation seam for ranking results.
//!
//! A curation adapter gets the scored candidate pool and may reorder or
//! filter it. It never invents entries: the caller keeps only ids that were
//! in the pool it handed over, and any adapter failure falls back to the
//! engine's own ordering. The default adapter passes results through
//! untouched, so the engine behaves deterministically without one.

use crate::metrics_store::DailyAggregate;
use crate::ranking::{EntityClass, RankedEntity, RankingPeriod};
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("curation adapter '{adapter}' failed: {message}")]
pub struct CurationError {
    pub adapter: String,
    pub message: String,
}

impl CurationError {
    pub fn new<A: Into<String>, M: Into<String>>(adapter: A, message: M) -> Self {
        Self {
            adapter: adapter.into(),
            message: message.into(),
        }
    }
}

/// What the ranking request asked for, passed alongside the candidate pool.
#[derive(Debug, Clone)]
pub struct CurationContext {
    pub entity: EntityClass,
    pub period: RankingPeriod,
    pub requested_count: usize,
    pub category: Option<String>,
}

pub trait CurationAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Reorders or filters the scored candidate pool. Returned ids must come
    /// from `candidates`; the caller drops anything else.
    fn curate(
        &self,
        candidates: Vec<RankedEntity>,
        ctx: &CurationContext,
    ) -> Result<Vec<RankedEntity>, CurationError>;

    /// Called after a day has been aggregated, with that day's rows.
    fn observe_daily_aggregates(
        &self,
        _date: NaiveDate,
        _aggregates: &[DailyAggregate],
    ) -> Result<(), CurationError> {
        Ok(())
    }
}

impl<T: CurationAdapter> CurationAdapter for Arc<T> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn curate(
        &self,
        candidates: Vec<RankedEntity>,
        ctx: &CurationContext,
    ) -> Result<Vec<RankedEntity>, CurationError> {
        self.as_ref().curate(candidates, ctx)
    }

    fn observe_daily_aggregates(
        &self,
        date: NaiveDate,
        aggregates: &[DailyAggregate],
    ) -> Result<(), CurationError> {
        self.as_ref().observe_daily_aggregates(date, aggregates)
    }
}

/// Identity adapter, used when no external curation is wired in.
pub struct NoopCurationAdapter;

impl CurationAdapter for NoopCurationAdapter {
    fn name(&self) -> &str {
        "noop"
    }

    fn curate(
        &self,
        candidates: Vec<RankedEntity>,
        _ctx: &CurationContext,
    ) -> Result<Vec<RankedEntity>, CurationError> {
        Ok(candidates)
    }
}
