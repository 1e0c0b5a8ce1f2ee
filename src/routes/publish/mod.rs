//! Publish endpoints - idempotent multi-platform video publishing

pub mod dto;
pub mod posts;
pub mod upload;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    posts::routes()
}
