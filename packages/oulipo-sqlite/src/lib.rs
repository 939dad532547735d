#![forbid(unsafe_code)]
//! SQLite-backed persistence for oulipo: a content-addressed document store for compiled
//! document files and a snapshot store for stream-cache write-back.

mod store;

pub use store::{SqliteDocumentStore, SqliteSnapshotStore};
