//! Axum router construction.
//!
//! The [`app`] function wires the event endpoints, the local signed-link
//! endpoint and the operational endpoints to their handlers and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::generate_request_id;
use crate::handlers::{events, objects};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// -- OpenAPI document ---------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "thumbforge event API",
        version = "0.1.0",
        description = "Thumbnail generation and follow notification handlers"
    ),
    paths(
        health_check,
        crate::handlers::events::object_finalized,
        crate::handlers::events::follow_created,
        crate::handlers::objects::get_signed_object,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Events", description = "Storage and document event handlers"),
        (name = "Objects", description = "Signed links for the local storage backend"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .route("/events/object-finalized", post(events::object_finalized))
        .route("/events/follow-created", post(events::follow_created))
        .route("/objects/:bucket/*path", get(objects::get_signed_object))
        .with_state(state)
        // Inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (16 hex chars), `date` and `server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("thumbforge"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health`: returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationsConfig;
    use crate::converter::native::NativeConverter;
    use crate::identity::directory::UserRecord;
    use crate::identity::memory::MemoryUserDirectory;
    use crate::messaging::memory::MemoryMessenger;
    use crate::metadata::memory::MemoryDocumentStore;
    use crate::metadata::store::DocumentStore;
    use crate::pipeline::follow::FollowNotifier;
    use crate::pipeline::thumbnail::{ThumbnailPipeline, ThumbnailSettings};
    use crate::staging::Staging;
    use crate::storage::backend::ObjectStorage;
    use crate::storage::local::LocalBackend;
    use axum::body::Body;
    use serde_json::{json, Value};
    use std::time::{Duration, SystemTime};
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        router: Router,
        local: Arc<LocalBackend>,
        store: Arc<MemoryDocumentStore>,
        messenger: Arc<MemoryMessenger>,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(
            LocalBackend::new(
                dir.path().join("objects"),
                "secret",
                "http://localhost:8080/objects",
            )
            .unwrap(),
        );
        let store = Arc::new(MemoryDocumentStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        directory.insert(UserRecord {
            uid: "u1".to_string(),
            display_name: Some("Ana".to_string()),
            photo_url: None,
        });
        let messenger = Arc::new(MemoryMessenger::new());

        let pipeline = ThumbnailPipeline::new(
            local.clone(),
            Arc::new(NativeConverter::new()),
            store.clone(),
            Staging::new(dir.path().join("stage")),
            ThumbnailSettings::default(),
        );
        let notifier = FollowNotifier::new(
            store.clone(),
            directory,
            messenger.clone(),
            NotificationsConfig::default(),
        );
        let state = Arc::new(AppState {
            pipeline: Arc::new(pipeline),
            notifier: Arc::new(notifier),
            local_objects: Some(local.clone()),
        });

        TestApp {
            _dir: dir,
            router: app(state),
            local,
            store,
            messenger,
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_health_has_common_headers() {
        let t = test_app();
        let response = t
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[REQUEST_ID_HEADER].len(), 16);
        assert!(headers.contains_key("date"));
        assert_eq!(headers["server"], "thumbforge");
    }

    #[tokio::test]
    async fn test_openapi_lists_event_routes() {
        let t = test_app();
        let response = t
            .router
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let doc = body_json(response).await;
        assert!(doc["paths"].get("/events/object-finalized").is_some());
        assert!(doc["paths"].get("/events/follow-created").is_some());
    }

    #[tokio::test]
    async fn test_object_finalized_records_and_serves_links() {
        let t = test_app();
        t.local
            .upload(
                "photos",
                "images/cat.png",
                png_bytes(800, 600).into(),
                "image/png",
            )
            .await
            .unwrap();

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/events/object-finalized",
                json!({"bucket": "photos", "name": "images/cat.png", "contentType": "image/png"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "recorded");
        assert_eq!(body["thumbnailPath"], "images/thumb_cat.png");

        let docs = t.store.list("images").await.unwrap();
        assert_eq!(docs.len(), 1);

        // The recorded thumbnail link resolves through /objects.
        let link = docs[0].str_field("thumbnail").unwrap();
        let path = link.trim_start_matches("http://localhost:8080");
        let response = t
            .router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (200, 150));
    }

    #[tokio::test]
    async fn test_object_finalized_skips_non_images() {
        let t = test_app();
        let response = t
            .router
            .oneshot(post_json(
                "/events/object-finalized",
                json!({"bucket": "photos", "name": "docs/report.pdf", "contentType": "application/pdf"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "skipped");
        assert_eq!(body["reason"], "not_an_image");
    }

    #[tokio::test]
    async fn test_object_finalized_failure_is_500() {
        let t = test_app();
        let response = t
            .router
            .oneshot(post_json(
                "/events/object-finalized",
                json!({"bucket": "photos", "name": "images/missing.png", "contentType": "image/png"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["stage"], "staging");
        assert!(t.store.documents("images").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_is_400() {
        let t = test_app();
        let response = t
            .router
            .oneshot(post_json("/events/object-finalized", json!({"name": 3})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_follow_created_notifies() {
        let t = test_app();
        t.store
            .put(
                "ProfileAssociated",
                "p1",
                json!({"paAssociatedId": "u1"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
        t.store
            .put(
                "InfoDevice",
                "d1",
                json!({"idRegid": "tok-1"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        let event = json!({"value": {
            "name": "projects/p/databases/(default)/documents/ProfileAssociatedFollow/f1",
            "fields": {"pafProfileAssociatedId": {"stringValue": "p1"}}
        }});
        let response = t
            .router
            .oneshot(post_json("/events/follow-created", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "notified");
        assert_eq!(body["report"]["sent"], 1);
        assert_eq!(t.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_failure_is_acknowledged() {
        let t = test_app();
        let event = json!({"value": {
            "name": "projects/p/databases/(default)/documents/ProfileAssociatedFollow/f1",
            "fields": {"pafProfileAssociatedId": {"stringValue": "missing"}}
        }});
        let response = t
            .router
            .oneshot(post_json("/events/follow-created", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "profile_not_found");
    }

    #[tokio::test]
    async fn test_signed_object_rejects_bad_signature() {
        let t = test_app();
        t.local
            .upload("photos", "a.png", bytes::Bytes::from("x"), "image/png")
            .await
            .unwrap();
        let expires = SystemTime::now() + Duration::from_secs(60);
        let good = t.local.signed_url("photos", "a.png", expires).await.unwrap();
        let tampered = format!("{}00", good.trim_start_matches("http://localhost:8080"));

        let response = t
            .router
            .oneshot(Request::get(tampered).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
