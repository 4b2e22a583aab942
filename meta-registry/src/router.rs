use std::future::ready;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::register;
use crate::registry::Registrar;

#[derive(Clone)]
pub struct State {
    pub registrar: Registrar,
    /// Upper bound on a batch after decompression.
    pub max_body_size: usize,
}

async fn index() -> &'static str {
    "meta-registry"
}

pub fn router(registrar: Registrar, metrics: bool, max_body_size: usize) -> Router {
    let state = State {
        registrar,
        max_body_size,
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(register::health))
        .route("/register", post(register::register))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Installing a global recorder when used as a library (during tests etc)
    // does not work well, so this is opt-in.
    if !metrics {
        return router;
    }

    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(e) => {
            tracing::warn!("not exporting metrics, failed to install recorder: {}", e);
            router
        }
    }
}
