//! Health and metrics endpoint.

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use permafrost_metadata::MetadataStore;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

/// Build the observability router: `/healthz` checks datastore
/// connectivity, `/metrics` serves the Prometheus registry.
pub fn router(store: Arc<dyn MetadataStore>, registry: Registry) -> Router {
    Router::new()
        .route(
            "/healthz",
            get(move || {
                let store = store.clone();
                async move {
                    match store.health_check().await {
                        Ok(()) => (StatusCode::OK, "ok").into_response(),
                        Err(err) => {
                            tracing::error!("health check: {err}");
                            (StatusCode::SERVICE_UNAVAILABLE, "datastore unavailable")
                                .into_response()
                        }
                    }
                }
            }),
        )
        .route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metrics = registry.gather();
                    let mut buf = Vec::new();
                    if let Err(err) = TextEncoder::new().encode(&metrics, &mut buf) {
                        tracing::error!("encoding metrics: {err}");
                        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
                    }
                    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string()).into_response()
                }
            }),
        )
}
