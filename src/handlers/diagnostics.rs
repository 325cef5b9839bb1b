use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::{info, warn};

use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Live coordinator counters and process resource usage. Authenticated
/// identities only.
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DiagnosticsResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !state.identity.resolve(&headers).authenticated {
        warn!("Rejected anonymous diagnostics request");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                code: 401,
                status: "Unauthorized".to_string(),
                error: "diagnostics require an authenticated identity".to_string(),
            }),
        ));
    }

    let stats = state.coordinator.stats().await;

    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB, Conn: {}, Notes: {} ({} dirty)",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        stats.connections,
        stats.notes,
        stats.dirty_notes
    );

    Ok(Json(DiagnosticsResponse {
        n_conn: stats.connections as u32,
        n_notes: stats.notes as u32,
        n_dirty_notes: stats.dirty_notes as u32,
        n_pending_admissions: stats.pending_admissions as u32,
        n_pending_drains: stats.pending_drains as u32,
        n_revision_passes: stats.revision_passes,
        cpu_usage,
        memory_alloc,
        memory_total,
        memory_free,
    }))
}
