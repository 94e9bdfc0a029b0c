//! API routes module

pub mod mentor;

use crate::api::state::SharedState;
use axum::Router;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Skill mentor routes
        .nest("/skill-mentor", mentor::router())
}
