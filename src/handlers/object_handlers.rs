//! HTTP handlers for the object lifecycle and the public download route.
//!
//! Two visibility tiers, by design: the public download route and every
//! authentication failure collapse to one opaque not-found response, while
//! the authenticated confirm flow returns real diagnostics (message plus a
//! presigned debug URL) because it is operator-facing. Causes are logged
//! before collapsing.

use crate::{
    auth::is_authorized,
    errors::{AppError, GatewayError},
    handlers::AppState,
    models::object::{ObjectRecord, ObjectStatus},
    services::signer::URL_EXPIRY_SECS,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Request body for `POST /api/objects`.
#[derive(Debug, Deserialize)]
pub struct InitiateUploadReq {
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

/// Response for `POST /api/objects`: the pending record plus the presigned
/// PUT URL the client uploads through.
#[derive(Serialize)]
pub struct InitiateUploadResp {
    pub object: ObjectRecord,
    pub upload_url: String,
    pub expires_in_secs: u64,
}

/// Query params accepted by the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct ListResp {
    pub objects: Vec<ObjectRecord>,
    pub next_token: Option<String>,
}

/// Log the real cause, answer with the uniform opaque response.
fn collapse(err: GatewayError) -> AppError {
    tracing::warn!("request failed: {}", err);
    AppError::opaque()
}

/// `POST /api/objects` — create a pending record and presign its upload.
pub async fn initiate_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    if !is_authorized(&headers, &state.api_token) {
        return Err(AppError::opaque());
    }

    let record = state
        .metadata
        .create_pending(&req.filename, req.content_type, req.size_bytes)
        .await
        .map_err(collapse)?;

    let upload_url = state.proxy.upload_url(&record);
    tracing::info!("initiated upload {} ({} bytes)", record.id, record.size_bytes);

    Ok((
        StatusCode::CREATED,
        Json(InitiateUploadResp {
            object: record,
            upload_url,
            expires_in_secs: URL_EXPIRY_SECS,
        }),
    ))
}

/// `POST /api/objects/{id}/confirm` — verify the bytes landed upstream and
/// flip the record to `complete`.
///
/// Operator-facing: failures here carry detail instead of the opaque 404.
pub async fn confirm_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !is_authorized(&headers, &state.api_token) {
        return Err(AppError::opaque());
    }

    let id = Uuid::parse_str(&id).map_err(|_| AppError::not_found("unknown object id"))?;
    let record = state
        .metadata
        .find(id)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
        .ok_or_else(|| AppError::not_found("unknown object id"))?;

    if record.status != ObjectStatus::Pending {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            format!("object is {}, not pending", record.status),
        ));
    }

    match state.proxy.verify_exists(&record).await {
        Ok(true) => {
            if !state
                .metadata
                .mark_complete(id)
                .await
                .map_err(|err| AppError::internal(err.to_string()))?
            {
                // Raced with another confirm or a delete.
                return Err(AppError::new(
                    StatusCode::CONFLICT,
                    "object is no longer pending",
                ));
            }
            let record = state
                .metadata
                .find(id)
                .await
                .map_err(|err| AppError::internal(err.to_string()))?
                .ok_or_else(|| AppError::not_found("unknown object id"))?;
            tracing::info!("confirmed upload {}", id);
            Ok((StatusCode::OK, Json(record)).into_response())
        }
        Ok(false) => {
            // Definitive upstream 404: the bytes never arrived.
            if let Err(err) = state.metadata.mark_failed(id).await {
                tracing::warn!("failed to mark {} failed: {}", id, err);
            }
            Ok((
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "object bytes not found upstream",
                    "debug_url": state.proxy.debug_download_url(&record),
                })),
            )
                .into_response())
        }
        Err(err) => {
            // Transport or unexpected status: not definitive, stay pending so
            // the operator can retry.
            tracing::warn!("confirm probe for {} failed: {}", id, err);
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": format!("existence probe failed: {}", err),
                    "debug_url": state.proxy.debug_download_url(&record),
                })),
            )
                .into_response())
        }
    }
}

/// `GET /objects/{id}` — public streaming download with range support.
///
/// Only `complete` records are servable; everything else is the opaque 404.
pub async fn serve_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::opaque())?;
    let record = state
        .metadata
        .find(id)
        .await
        .and_then(|record| record.ok_or(GatewayError::NotFound))
        .map_err(collapse)?;

    if record.status != ObjectStatus::Complete {
        return Err(collapse(GatewayError::NotFound));
    }

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let served = state
        .proxy
        .serve(&record, range_header)
        .await
        .map_err(collapse)?;

    let mut response = Response::new(Body::from_stream(served.body));
    *response.status_mut() = StatusCode::from_u16(served.status).unwrap_or(StatusCode::OK);
    let headers_mut = response.headers_mut();
    for (name, value) in served.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers_mut.insert(name, value);
        }
    }
    Ok(response)
}

/// `DELETE /api/objects/{id}` — remove the upstream object, the metadata
/// record, and the cache entry.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !is_authorized(&headers, &state.api_token) {
        return Err(AppError::opaque());
    }

    let id = Uuid::parse_str(&id).map_err(|_| AppError::opaque())?;
    let record = state
        .metadata
        .find(id)
        .await
        .and_then(|record| record.ok_or(GatewayError::NotFound))
        .map_err(collapse)?;

    // Upstream first: if this fails the record survives and the delete can be
    // retried. An already-absent upstream object still succeeds.
    state.proxy.delete(&record).await.map_err(collapse)?;
    state.metadata.delete(id).await.map_err(collapse)?;

    tracing::info!("deleted object {}", id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /api/objects` — newest-first listing with opaque continuation tokens.
pub async fn list_objects(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !is_authorized(&headers, &state.api_token) {
        return Err(AppError::opaque());
    }

    let page = state
        .metadata
        .list(query.limit.unwrap_or(50), query.token.as_deref())
        .await
        .map_err(collapse)?;

    Ok(Json(ListResp {
        objects: page.objects,
        next_token: page.next_token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        cache::DiskCache, metadata::MetadataStore, proxy::StreamProxy, signer::Signer,
    };
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    const TOKEN: &str = "operator-token";

    async fn test_state(cache_dir: &std::path::Path) -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let schema = include_str!("../../migrations/0001_init.sql");
        for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        // Points at a dead endpoint; the tests below never reach upstream.
        let signer = Signer::new(
            "http://127.0.0.1:1",
            "us-east-1",
            "media",
            "AKIDEXAMPLE",
            "secret",
        );
        AppState {
            metadata: MetadataStore::new(Arc::new(pool)),
            proxy: StreamProxy::new(signer, DiskCache::new(cache_dir)).unwrap(),
            cache_dir: cache_dir.to_path_buf(),
            api_token: TOKEN.into(),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn assert_opaque(err: &AppError) {
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "not found");
    }

    #[tokio::test]
    async fn unauthenticated_requests_get_the_uniform_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let req = InitiateUploadReq {
            filename: "a.png".into(),
            content_type: None,
            size_bytes: 10,
        };

        let err = initiate_upload(State(state.clone()), HeaderMap::new(), Json(req))
            .await
            .err()
            .unwrap();
        assert_opaque(&err);

        let err = delete_object(
            State(state.clone()),
            Path(Uuid::new_v4().to_string()),
            bearer("wrong-token"),
        )
        .await
        .err()
        .unwrap();
        assert_opaque(&err);

        let err = list_objects(
            State(state),
            HeaderMap::new(),
            Query(ListQuery {
                limit: None,
                token: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_opaque(&err);
    }

    #[tokio::test]
    async fn initiate_returns_record_and_signed_put_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let req = InitiateUploadReq {
            filename: "my photo.png".into(),
            content_type: Some("image/png".into()),
            size_bytes: 1024,
        };

        let response = initiate_upload(State(state), bearer(TOKEN), Json(req))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["object"]["status"], "pending");
        assert_eq!(body["expires_in_secs"], URL_EXPIRY_SECS);
        let url = body["upload_url"].as_str().unwrap();
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        // Signed PUTs carry the content headers in SignedHeaders.
        assert!(url.contains("content-length%3Bcontent-type%3Bhost"));
    }

    #[tokio::test]
    async fn serving_a_pending_record_is_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let record = state
            .metadata
            .create_pending("a.bin", None, 10)
            .await
            .unwrap();

        let err = serve_object(
            State(state),
            Path(record.id.to_string()),
            HeaderMap::new(),
        )
        .await
        .err()
        .unwrap();
        assert_opaque(&err);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let err = serve_object(
            State(state.clone()),
            Path(Uuid::new_v4().to_string()),
            HeaderMap::new(),
        )
        .await
        .err()
        .unwrap();
        assert_opaque(&err);

        let err = serve_object(State(state), Path("not-a-uuid".into()), HeaderMap::new())
            .await
            .err()
            .unwrap();
        assert_opaque(&err);
    }
}
