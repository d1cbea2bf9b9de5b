//! `GET /objects/{bucket}/{path}`: serve signed links issued by the local
//! storage backend.

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use crate::storage::backend::ObjectStorage;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LinkParams {
    pub expires: u64,
    pub signature: String,
}

#[utoipa::path(
    get,
    path = "/objects/{bucket}/{path}",
    tag = "Objects",
    operation_id = "GetSignedObject",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("path" = String, Path, description = "Object path"),
        ("expires" = u64, Query, description = "Expiry, seconds since the epoch"),
        ("signature" = String, Query, description = "Hex HMAC-SHA256 link signature")
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 403, description = "Bad or expired signature"),
        (status = 404, description = "No such object, or local links disabled")
    )
)]
pub async fn get_signed_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Query(params): Query<LinkParams>,
) -> Response {
    let Some(local) = state.local_objects.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !local.verify_signature(
        &bucket,
        &path,
        params.expires,
        &params.signature,
        SystemTime::now(),
    ) {
        return (StatusCode::FORBIDDEN, "invalid or expired signature").into_response();
    }

    let data = match local.download(&bucket, &path).await {
        Ok(data) => data,
        Err(e) => {
            debug!(bucket = %bucket, path = %path, error = %e, "signed object unavailable");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let content_type = local
        .content_type(&bucket, &path)
        .ok()
        .flatten()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], data).into_response()
}
