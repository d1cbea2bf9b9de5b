//! Object storage backends.
//!
//! The [`backend::ObjectStorage`] trait abstracts over where uploaded
//! objects live.  Implementations cover Google Cloud Storage, the local
//! filesystem, and an in-memory store for tests.

pub mod backend;
pub mod gcp;
pub mod local;
pub mod memory;
