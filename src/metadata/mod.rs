//! Document database layer.
//!
//! The [`store::DocumentStore`] trait defines the interface used by both
//! handlers: the thumbnail pipeline appends image records, the follow
//! notifier reads profiles and device registrations and prunes stale
//! tokens.  [`sqlite::SqliteDocumentStore`] is the default implementation.

pub mod firestore;
pub mod memory;
pub mod sqlite;
pub mod store;
