//! v1 routes for the job manager surface.

mod events;
mod jobs;
mod workflows;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::routes())
        .nest("/workflows", workflows::routes())
        .nest("/tasks", events::routes())
}
