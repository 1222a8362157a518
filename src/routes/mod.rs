pub mod accounts;
pub mod trips;

use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{auth, consumer, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(accounts::router())
        .merge(trips::router());

    Router::new()
        .nest("/api", api)
        .merge(consumer::router())
        .nest_service("/media", ServeDir::new(state.media.root()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::session_layer,
                )),
        )
        .with_state(state)
}
