//! Mock injection endpoint

use axum::{Json, extract::State};
use tracing::debug;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{MockRequest, MockResponse},
};

/// POST /api/v1/mock
///
/// Feeds `message` into the dispatch queue of the porter called `name`,
/// bypassing the broker
pub async fn mock_message(
    State(state): State<ApiState>,
    Json(request): Json<MockRequest>,
) -> ApiResult<Json<MockResponse>> {
    if request.name.is_empty() {
        return Err(ApiError::InvalidRequest("porter name is empty".to_string()));
    }

    let porter = state
        .find(&request.name)
        .ok_or_else(|| ApiError::UnknownPorter(request.name.clone()))?;

    porter
        .mock(request.message)
        .map_err(|e| ApiError::Rejected {
            porter: request.name.clone(),
            reason: e.to_string(),
        })?;
    debug!("mocked payload into {}", request.name);

    Ok(Json(MockResponse {
        accepted: true,
        name: request.name,
    }))
}
