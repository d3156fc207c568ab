//! v1 routes for the host manager surface.

mod hosts;
mod offers;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/offers", offers::routes())
        .nest("/hosts", hosts::routes())
}
