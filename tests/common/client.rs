//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all analytics-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client for the analytics API
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    /// Performs a GET request against an arbitrary path
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Records an event with the given type and subject
    pub async fn record_event(&self, metric_type: &str, subject_id: &str) -> Response {
        self.record_event_body(json!({
            "metric_type": metric_type,
            "subject_id": subject_id,
        }))
        .await
    }

    /// Records an event from a raw JSON body
    pub async fn record_event_body(&self, body: Value) -> Response {
        self.client
            .post(format!("{}/v1/analytics/event", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Fetches bucketed metrics for a metric type
    pub async fn get_metrics(&self, metric_type: &str, query: &str) -> Response {
        self.get(&format!("/v1/analytics/metrics/{}{}", metric_type, query))
            .await
    }

    /// Fetches top subjects for a metric type
    pub async fn get_top(&self, metric_type: &str, query: &str) -> Response {
        self.get(&format!("/v1/analytics/top/{}{}", metric_type, query))
            .await
    }

    /// Fetches weighted rankings
    pub async fn get_rankings(&self, query: &str) -> Response {
        self.get(&format!("/v1/analytics/rankings{}", query)).await
    }

    /// Fetches trending entities
    pub async fn get_trending(&self, query: &str) -> Response {
        self.get(&format!("/v1/analytics/trending{}", query)).await
    }

    /// Fetches the sales leaderboard
    pub async fn get_leaderboard(&self) -> Response {
        self.get("/v1/analytics/leaderboard").await
    }

    /// Fetches stored daily aggregate rows for a metric type
    pub async fn get_aggregates(&self, metric_type: &str, query: &str) -> Response {
        self.get(&format!("/v1/analytics/aggregates/{}{}", metric_type, query))
            .await
    }

    /// Triggers the daily aggregation run for a date
    pub async fn run_aggregation(&self, date: &str) -> Response {
        self.client
            .post(format!("{}/v1/analytics/aggregation/run", self.base_url))
            .json(&json!({ "date": date }))
            .send()
            .await
            .expect("Request failed")
    }
}
