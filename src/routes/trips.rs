use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{auth::CurrentUser, error::AppError, models::trip::TripResponse, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trip/", get(trip_list))
        .route("/trip/:trip_id/", get(trip_detail))
}

async fn trip_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<TripResponse>>, AppError> {
    let user = current.require_user()?;
    let trips = match user.trip_scope() {
        Some(scope) => state.trips.list_visible(scope).await?,
        None => Vec::new(),
    };
    Ok(Json(
        trips
            .into_iter()
            .map(|detail| TripResponse::new(detail, &state.media))
            .collect(),
    ))
}

async fn trip_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<TripResponse>, AppError> {
    let user = current.require_user()?;
    let scope = user.trip_scope().ok_or(AppError::NotFound)?;
    let trip_id = Uuid::parse_str(&trip_id).map_err(|_| AppError::NotFound)?;
    let detail = state
        .trips
        .find_visible(scope, &trip_id.to_string())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(TripResponse::new(detail, &state.media)))
}
