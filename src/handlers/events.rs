//! Event delivery endpoints.
//!
//! `POST /events/object-finalized` runs the thumbnail pipeline for a
//! finalized storage object; `POST /events/follow-created` runs the follow
//! notifier for a Firestore document-created event.  Bodies are parsed by
//! hand so malformed events get a uniform 400 response.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::errors::InvalidEvent;
use crate::metadata::firestore::{decode_fields, document_id};
use crate::pipeline::follow::FollowCreated;
use crate::pipeline::thumbnail::{FinalizedObject, Outcome};
use crate::AppState;

// -- Payloads -----------------------------------------------------------------

/// Storage object metadata as delivered by the finalize trigger.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFinalizedEvent {
    /// Bucket holding the object.
    #[garde(length(min = 3, max = 222), pattern(r"^[a-z0-9][a-z0-9._\-]*[a-z0-9]$"))]
    pub bucket: String,
    /// Object path within the bucket.
    #[garde(length(min = 1, max = 1024))]
    pub name: String,
    /// MIME type reported at upload time.
    #[garde(skip)]
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Firestore document event (`google.cloud.firestore.document.v1.created`).
#[derive(Debug, Deserialize, ToSchema)]
pub struct FirestoreDocumentEvent {
    pub value: FirestoreEventDocument,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FirestoreEventDocument {
    /// Full resource name, `projects/.../documents/{collection}/{id}`.
    pub name: String,
    /// Typed Firestore field values.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub fields: Map<String, Value>,
}

// -- Parsing ------------------------------------------------------------------

fn parse_object_event(body: &[u8]) -> Result<FinalizedObject, InvalidEvent> {
    let event: ObjectFinalizedEvent =
        serde_json::from_slice(body).map_err(|e| InvalidEvent(e.to_string()))?;
    event
        .validate()
        .map_err(|e| InvalidEvent(e.to_string()))?;
    Ok(FinalizedObject {
        bucket: event.bucket,
        path: event.name,
        content_type: event.content_type.filter(|ct| !ct.is_empty()),
    })
}

/// Collection segment of a Firestore document name.
fn parent_collection(name: &str) -> Option<&str> {
    let mut segments = name.rsplit('/');
    segments.next()?;
    segments.next()
}

fn parse_follow_event(body: &[u8], collection: &str) -> Result<FollowCreated, InvalidEvent> {
    let event: FirestoreDocumentEvent =
        serde_json::from_slice(body).map_err(|e| InvalidEvent(e.to_string()))?;
    let name = event.value.name;
    if parent_collection(&name) != Some(collection) {
        return Err(InvalidEvent(format!(
            "document {name} is not in collection {collection}"
        )));
    }
    let follow_id = document_id(&name);
    if follow_id.is_empty() {
        return Err(InvalidEvent(format!("document name {name} has no id")));
    }
    Ok(FollowCreated {
        follow_id: follow_id.to_string(),
        fields: decode_fields(&event.value.fields),
    })
}

// -- Handlers -----------------------------------------------------------------

/// `POST /events/object-finalized`: generate and record a thumbnail.
#[utoipa::path(
    post,
    path = "/events/object-finalized",
    tag = "Events",
    operation_id = "ObjectFinalized",
    request_body = ObjectFinalizedEvent,
    responses(
        (status = 200, description = "Thumbnail recorded or object skipped"),
        (status = 400, description = "Malformed event"),
        (status = 500, description = "Pipeline stage failed; redeliver")
    )
)]
pub async fn object_finalized(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let object = match parse_object_event(&body) {
        Ok(object) => object,
        Err(e) => return e.into_response(),
    };
    debug!(bucket = %object.bucket, path = %object.path, "object finalized event");

    match state.pipeline.run(&object).await {
        Ok(Outcome::Skipped(reason)) => (
            StatusCode::OK,
            Json(json!({ "status": "skipped", "reason": reason })),
        )
            .into_response(),
        Ok(Outcome::Recorded {
            thumbnail_path,
            record_id,
            record,
        }) => (
            StatusCode::OK,
            Json(json!({
                "status": "recorded",
                "thumbnailPath": thumbnail_path,
                "recordId": record_id,
                "record": record,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /events/follow-created`: notify devices about a new follower.
#[utoipa::path(
    post,
    path = "/events/follow-created",
    tag = "Events",
    operation_id = "FollowCreated",
    request_body = FirestoreDocumentEvent,
    responses(
        (status = 200, description = "Fan-out report, or a failure acknowledged without retry"),
        (status = 400, description = "Malformed event")
    )
)]
pub async fn follow_created(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let event = match parse_follow_event(&body, state.notifier.follow_collection()) {
        Ok(event) => event,
        Err(e) => return e.into_response(),
    };
    info!(follow_id = %event.follow_id, "follow created event");

    match state.notifier.run(&event).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "status": "notified", "report": report })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
