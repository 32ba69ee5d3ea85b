//! Route table for the gateway.
//!
//! ## Structure
//! - **Operator endpoints** (bearer-token authenticated)
//!   - `POST   /api/objects` — initiate an upload, returns a presigned PUT URL
//!   - `GET    /api/objects` — list objects (newest first, paginated)
//!   - `POST   /api/objects/{id}/confirm` — verify upstream bytes, mark complete
//!   - `DELETE /api/objects/{id}` — delete upstream object, record, and cache entry
//!
//! - **Public endpoints**
//!   - `GET    /objects/{id}` — streaming download with `Range` support
//!
//! Unauthenticated access to operator endpoints gets the same opaque 404 as a
//! genuinely missing object.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    object_handlers::{
        confirm_upload, delete_object, initiate_upload, list_objects, serve_object,
    },
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // operator endpoints
        .route("/api/objects", post(initiate_upload).get(list_objects))
        .route("/api/objects/{id}/confirm", post(confirm_upload))
        .route("/api/objects/{id}", delete(delete_object))
        // public download
        .route("/objects/{id}", get(serve_object))
}
