//! Pluggable durable storage for one entity type.
//!
//! # Backends
//!
//! - [`SqliteBackend`] - relational store for [`ExportedEvent`], schema-versioned
//! - [`DocumentBackend`] - one JSON document per record, grouped in per-entity collections
//! - [`MemoryBackend`] - volatile fallback, lost on process exit
//!
//! All backends implement [`Storage`], serialize their own writes and preserve insertion order
//! in [`Storage::all`].
use std::path::PathBuf;

use derive_more::Display;
use serde::{de::DeserializeOwned, Serialize};

use crate::{event::ExportedEvent, Result};

mod document;
mod memory;
pub(crate) mod schema;
mod sqlite;

pub use document::DocumentBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// An entity that can be kept in a [`Storage`], keyed by its own id.
pub trait Storable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the collection this entity type lives in. Backends that share one physical
    /// store between entity types use it to keep them apart.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

impl Storable for ExportedEvent {
    const COLLECTION: &'static str = "exported_event";

    fn id(&self) -> &str {
        ExportedEvent::id(self)
    }
}

/// Storage contract shared by all backends.
///
/// Every method is safe to call concurrently without external locking.
pub trait Storage<T: Storable>: Send + Sync {
    /// All stored items in insertion order. Records that fail to decode are dropped (and
    /// logged) instead of failing the whole call.
    fn all(&self) -> Result<Vec<T>>;

    /// Upsert keyed by id. Overwrites an existing item with the same id in place.
    fn add(&self, item: &T) -> Result<()>;

    /// Upsert keyed by id. Inserts if the id is unknown.
    fn update(&self, item: &T) -> Result<()>;

    /// Overwrite the stored item with the same id, keeping its position. Writes nothing and
    /// returns `false` when the id is not stored.
    fn replace(&self, item: &T) -> Result<bool>;

    fn get(&self, id: &str) -> Result<Option<T>>;

    /// Remove by id. Always returns `true`; unknown or empty ids are a no-op.
    fn remove(&self, id: &str) -> Result<bool>;

    /// Remove every item of this entity type.
    fn clear(&self) -> Result<()>;

    fn count(&self) -> Result<usize>;
}

/// Which backend an [`crate::EventRepository`] should open.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    #[display(fmt = "sqlite")]
    Sqlite,
    #[display(fmt = "document")]
    Document,
    #[display(fmt = "memory")]
    Memory,
}

/// Location and kind of the event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: BackendType,
    /// Database file for [`BackendType::Sqlite`], root directory for
    /// [`BackendType::Document`]. Ignored for [`BackendType::Memory`].
    pub path: PathBuf,
}

impl StorageConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> StorageConfig {
        StorageConfig {
            backend: BackendType::Sqlite,
            path: path.into(),
        }
    }

    pub fn document(path: impl Into<PathBuf>) -> StorageConfig {
        StorageConfig {
            backend: BackendType::Document,
            path: path.into(),
        }
    }

    pub fn memory() -> StorageConfig {
        StorageConfig {
            backend: BackendType::Memory,
            path: PathBuf::new(),
        }
    }
}
