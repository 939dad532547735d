#![forbid(unsafe_code)]
//! Core of a Xanadu-style document engine: variant streams over invariant content, an op log
//! with a compact binary encoding, and signed hash-chained document files that can be replayed.
//! This crate stays independent of concrete storage engines; persistence is reached through the
//! `InvariantStore`, `DocumentStore` and `SnapshotStore` traits.

pub mod cache;
pub mod chain;
pub mod config;
pub mod document;
pub mod element;
pub mod error;
pub mod ids;
pub mod machine;
pub mod ops;
pub mod rope;
pub mod span;
pub mod store;
pub mod stream;
mod wire;

#[cfg(feature = "serde")]
pub use cache::JsonFileSnapshotStore;
pub use cache::{
    Clock, ManualClock, MemorySnapshotStore, SnapshotStore, StreamCache, StreamSnapshot,
    SystemClock,
};
pub use chain::{fetch_chain, DocumentStore, MemoryDocumentStore};
pub use config::CacheConfig;
pub use document::{public_key_hash, DocumentFile, DocumentFileBuilder};
pub use element::{MediaReference, Overlay, OverlayMedia, StreamElement, TagSet};
pub use error::{Error, Result};
pub use ids::{DocumentHash, Identifier, MediaHash};
pub use machine::{DocumentStreams, Machine, VirtualContent};
pub use ops::{Op, OpCode, PoolIndex};
pub use rope::{NodeRef, Rope};
pub use span::{InvariantSpan, VariantSpan};
pub use store::{FileInvariantStore, InvariantStore, MemoryInvariantStore};
pub use stream::VariantStream;
