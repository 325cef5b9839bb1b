use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of the health and readiness checks
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_conn: u32,
    pub n_notes: u32,
    pub n_dirty_notes: u32,
    pub n_pending_admissions: u32,
    pub n_pending_drains: u32,
    pub n_revision_passes: u64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
