//! Vortex Analytics Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod aggregation;
pub mod analytics;
pub mod config;
pub mod curation;
pub mod error;
pub mod metrics_store;
pub mod query_cache;
pub mod ranking;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use analytics::{AnalyticsConfig, AnalyticsService, RecordEventRequest};
pub use curation::{CurationAdapter, NoopCurationAdapter};
pub use error::AnalyticsError;
pub use metrics_store::{MetricType, MetricsStore, SqliteMetricsStore};
pub use ranking::{EntityClass, RankingPeriod, RankingWeights};
pub use server::{run_server, RequestsLoggingLevel};
