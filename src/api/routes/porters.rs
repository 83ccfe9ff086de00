//! Porter statistics endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::PortersResponse};

/// GET /api/v1/porters
///
/// Returns the counters and mastership of every porter in this process
pub async fn list_porters(State(state): State<ApiState>) -> Json<PortersResponse> {
    Json(PortersResponse {
        porters: state.porters.iter().map(|porter| porter.stats()).collect(),
    })
}
