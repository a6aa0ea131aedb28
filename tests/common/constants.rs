//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (subject IDs, timeouts, etc.), update only
//! this file.

// ============================================================================
// Test Subject IDs
// ============================================================================

/// Artwork ID for "Neon Harbor"
pub const ARTWORK_1_ID: &str = "artwork-1";

/// Artwork ID for "Quiet Orchard"
pub const ARTWORK_2_ID: &str = "artwork-2";

/// Artist ID linked to both test artworks
pub const ARTIST_1_ID: &str = "artist-1";

// ============================================================================
// Timing
// ============================================================================

/// How long to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// How often to poll while waiting for readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 25;

/// Per-request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
