//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::ScanReport;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers. Written by the scan
/// loop after every run.
pub struct DashboardState {
    pub reports: RwLock<BTreeMap<u64, ScanReport>>,
    pub scans_completed: RwLock<u64>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(BTreeMap::new()),
            scans_completed: RwLock::new(0),
            started_at: Utc::now(),
        }
    }

    /// Replace each channel's last report with the new one.
    pub async fn record(&self, reports: Vec<ScanReport>) {
        let mut stored = self.reports.write().await;
        for report in reports {
            stored.insert(report.channel_id, report);
        }
        *self.scans_completed.write().await += 1;
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub scans_completed: u64,
    pub channels_reported: usize,
    pub last_scan_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let reports = state.reports.read().await;
    let scans_completed = *state.scans_completed.read().await;

    Json(StatusResponse {
        status: "running".to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        scans_completed,
        channels_reported: reports.len(),
        last_scan_at: reports.values().map(|r| r.finished_at).max(),
    })
}

/// GET /api/report
pub async fn get_reports(State(state): State<AppState>) -> Json<Vec<ScanReport>> {
    let reports = state.reports.read().await;
    Json(reports.values().cloned().collect())
}

/// GET /api/report/:channel_id
pub async fn get_channel_report(
    State(state): State<AppState>,
    Path(channel_id): Path<u64>,
) -> Result<Json<ScanReport>, StatusCode> {
    let reports = state.reports.read().await;
    reports
        .get(&channel_id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
