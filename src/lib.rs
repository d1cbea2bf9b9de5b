//! thumbforge: event-driven thumbnail generation and follow notifications.
//!
//! Two handlers sit behind a small HTTP event surface.  The thumbnail
//! pipeline reacts to finalized storage objects, writes a bounded thumbnail
//! next to the original, and records signed links to both.  The follow
//! notifier reacts to new follow documents and pushes a notification to
//! registered devices.  Every external system sits behind a trait with a
//! production and an in-memory implementation.

use std::sync::Arc;

pub mod bootstrap;
pub mod config;
pub mod converter;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod messaging;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod staging;
pub mod storage;

use crate::pipeline::follow::FollowNotifier;
use crate::pipeline::thumbnail::ThumbnailPipeline;
use crate::storage::local::LocalBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Thumbnail pipeline for object-finalized events.
    pub pipeline: Arc<ThumbnailPipeline>,
    /// Notifier for follow-created events.
    pub notifier: Arc<FollowNotifier>,
    /// Local storage backend, when signed links are served by this process.
    pub local_objects: Option<Arc<LocalBackend>>,
}
