use axum::extract::FromRef;

use crate::analytics::AnalyticsService;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedAnalyticsService = Arc<AnalyticsService>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub analytics: GuardedAnalyticsService,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedAnalyticsService {
    fn from_ref(input: &ServerState) -> Self {
        input.analytics.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
