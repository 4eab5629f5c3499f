//! Defines routes for object transfers and health probes.
//!
//! ## Structure
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*name}`: upload object (must not already exist)
//!   - `GET    /{bucket}/{*name}`: download object
//!   - any other method: 405
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`
//!
//! The wildcard `*name` allows nested names like `a/b/c`. Anything that does
//! not match is a malformed object path.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, malformed_path, put_object, reject_method},
    },
    services::transfer_service::TransferService,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, put},
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`TransferService`) to all handlers.
pub fn routes() -> Router<TransferService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object-level routes
        .route(
            "/{bucket}/{*name}",
            put(put_object)
                .get(get_object)
                .head(reject_method)
                .fallback(reject_method),
        )
        .fallback(malformed_path)
        // Object size is bounded by the declared Content-Length only.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(log_request))
}

async fn log_request(req: Request, next: Next) -> Response {
    tracing::info!("request {} {}", req.method(), req.uri().path());
    next.run(req).await
}
