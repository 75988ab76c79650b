use axum::Router;
use std::sync::Arc;

use crate::AppContext;

pub mod media;

pub fn router(ctx: Arc<AppContext>) -> Router {
    media::media_router(ctx)
}
