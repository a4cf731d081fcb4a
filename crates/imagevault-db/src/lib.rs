//! Imagevault-DB: the metadata store contract and its implementations.
//!
//! The registry core is written against the [`MetadataStore`] trait. Two
//! implementations ship with the crate:
//!
//! - [`MemoryMetadataStore`] — an arena-map store owned by the instance,
//!   used by tests and as the reference for list/filter semantics
//! - [`SqliteMetadataStore`] — SQLite persistence behind an r2d2 pool with
//!   embedded migrations

pub mod filters;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use memory::MemoryMetadataStore;
pub use models::{ImageChanges, ImageRecord};
pub use sqlite::SqliteMetadataStore;
pub use store::{ListQuery, MetadataStore, SortDir, SortKey};
