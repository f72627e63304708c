pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod keys_api;

use axum::{routing::get, Extension, Router};

use crate::keys::KeyLifecycleService;

pub async fn root() -> &'static str {
    "Signing Keys API"
}

/// Banner plus the signing key routes, with `service` installed as an extension.
pub fn app(service: KeyLifecycleService) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(keys_api::routes())
        .layer(Extension(service))
}
