//! Request and response bodies of the debug API

use serde::{Deserialize, Serialize};

use crate::collector::PorterStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Porters (replicas included) served by this process
    pub porters: usize,
}

/// Body of `POST /api/v1/mock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRequest {
    /// Porter name
    pub name: String,
    /// Raw payload, passed to the analyzer unchanged
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockResponse {
    pub accepted: bool,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortersResponse {
    pub porters: Vec<PorterStats>,
}
