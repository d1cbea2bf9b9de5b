//! HTTP handlers.
//!
//! Each handler takes `State<Arc<AppState>>` and returns an axum
//! `Response`.  Business logic lives in [`crate::pipeline`].

pub mod events;
pub mod objects;
