use std::sync::Arc;

use axum::Router;

use crate::{store::StoreConnector, Config};

mod health;
mod index;
mod upload;

// ---

/// State shared by every route. Settings the routes need are applied when
/// the router is built, so only the store connector travels with requests.
pub type AppState = Arc<dyn StoreConnector>;

pub fn router(store: Arc<dyn StoreConnector>, config: &Config) -> Router {
    // ---
    Router::new()
        .merge(index::router())
        .merge(upload::router(config.max_upload_bytes))
        .merge(health::router())
        .with_state(store)
}
