//! Handler error types.
//!
//! [`PipelineError`] has one variant per fallible thumbnail stage and
//! [`NotifyError`] covers the follow notifier.  Both implement
//! [`axum::response::IntoResponse`] so event handlers can return them
//! directly; pipeline failures map to 500 so the delivering platform's
//! retry policy applies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Terminal failures of a thumbnail pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Mirroring the object into the staging area failed.
    #[error("staging {path} failed: {source:#}")]
    Staging {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The converter could not be run or exited unsuccessfully.
    #[error("converting {path} failed: {source:#}")]
    Conversion {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Uploading the thumbnail failed.
    #[error("publishing {path} failed: {source:#}")]
    Publish {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// A signed URL request failed.
    #[error("issuing signed links for {path} failed: {source:#}")]
    LinkIssuance {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Appending the image record failed.
    #[error("recording links for {path} failed: {source:#}")]
    Recording {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Stage name used in logs, metrics, and error bodies.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Staging { .. } => "staging",
            PipelineError::Conversion { .. } => "conversion",
            PipelineError::Publish { .. } => "publish",
            PipelineError::LinkIssuance { .. } => "link_issuance",
            PipelineError::Recording { .. } => "recording",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "failed",
                "stage": self.stage(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

/// Failures of the follow notifier.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A required document field was missing or not a string.
    #[error("document {document} has no {field}")]
    MissingField { document: String, field: &'static str },

    /// The follower's associated profile does not exist.
    #[error("profile {0} not found")]
    ProfileNotFound(String),

    /// The follower's user account does not exist.
    #[error("user {0} not found")]
    UserNotFound(String),

    /// Document store access failed.
    #[error("document store error: {0:#}")]
    Store(#[source] anyhow::Error),

    /// User directory lookup failed.
    #[error("user directory error: {0:#}")]
    Directory(#[source] anyhow::Error),

    /// The push gateway rejected the whole send.
    #[error("messaging error: {0:#}")]
    Messaging(#[source] anyhow::Error),
}

impl NotifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyError::MissingField { .. } => "missing_field",
            NotifyError::ProfileNotFound(_) => "profile_not_found",
            NotifyError::UserNotFound(_) => "user_not_found",
            NotifyError::Store(_) => "store",
            NotifyError::Directory(_) => "directory",
            NotifyError::Messaging(_) => "messaging",
        }
    }
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        // Acknowledged: a redelivery could notify devices twice.
        (
            StatusCode::OK,
            Json(json!({
                "status": "failed",
                "error": self.kind(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

/// A malformed event payload.
#[derive(Debug, Error)]
#[error("invalid event: {0}")]
pub struct InvalidEvent(pub String);

impl IntoResponse for InvalidEvent {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "invalid", "message": self.0 })),
        )
            .into_response()
    }
}
