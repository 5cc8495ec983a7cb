use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::error::CoreError;
use crate::middlewares::auth::JwtClaims;
use crate::services::leaderboard_service::LeaderboardService;
use crate::services::AppState;

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let response = LeaderboardService::new(state.mongo.clone())
        .leaderboard(&claims.sub)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(Json(response))
}
