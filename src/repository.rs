use crate::{
    event::ExportedEvent,
    storage::{
        BackendType, DocumentBackend, MemoryBackend, SqliteBackend, Storage, StorageConfig,
    },
    Error, Result,
};

/// Durable, thread-safe queue of outbound events.
///
/// Every mutation is written through to the backend before returning, and is visible to reads
/// from any thread right after. [`EventRepository::all`] returns events in the order they were
/// first added.
pub struct EventRepository {
    backend: Box<dyn Storage<ExportedEvent>>,
    backend_type: BackendType,
}

/// Result of [`EventRepository::open`].
///
/// Opening never fails: if the configured backend cannot be initialized the repository falls
/// back to a volatile in-memory store, and the cause is kept here so it can be reported.
pub enum OpenedRepository {
    Primary(EventRepository),
    Fallback {
        repository: EventRepository,
        cause: Error,
    },
}

impl OpenedRepository {
    pub fn is_fallback(&self) -> bool {
        matches!(self, OpenedRepository::Fallback { .. })
    }

    pub fn into_repository(self) -> EventRepository {
        match self {
            OpenedRepository::Primary(repository) => repository,
            OpenedRepository::Fallback { repository, .. } => repository,
        }
    }
}

impl EventRepository {
    /// Open the repository described by `config`, falling back to memory on failure.
    pub fn open(config: &StorageConfig) -> OpenedRepository {
        let backend: Result<Box<dyn Storage<ExportedEvent>>> = match config.backend {
            BackendType::Sqlite => SqliteBackend::open(&config.path).map(|b| Box::new(b) as _),
            BackendType::Document => {
                DocumentBackend::<ExportedEvent>::open(&config.path).map(|b| Box::new(b) as _)
            }
            BackendType::Memory => Ok(Box::new(MemoryBackend::<ExportedEvent>::new())),
        };

        match backend {
            Ok(backend) => OpenedRepository::Primary(EventRepository::new(backend, config.backend)),
            Err(cause) => {
                log::warn!(target: "beacon",
                           backend:display = config.backend,
                           path:display = config.path.display();
                           "event store unavailable, falling back to memory: {:?}", cause);
                OpenedRepository::Fallback {
                    repository: EventRepository::new(
                        Box::new(MemoryBackend::<ExportedEvent>::new()),
                        BackendType::Memory,
                    ),
                    cause,
                }
            }
        }
    }

    pub fn new(backend: Box<dyn Storage<ExportedEvent>>, backend_type: BackendType) -> Self {
        EventRepository {
            backend,
            backend_type,
        }
    }

    /// Backend actually in use (after any fallback).
    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    pub fn add(&self, event: &ExportedEvent) -> Result<()> {
        log::trace!(target: "beacon",
                    event_id = event.id(),
                    route:display = event.route();
                    "storing event");
        self.backend.add(event)
    }

    pub fn update(&self, event: &ExportedEvent) -> Result<()> {
        self.backend.update(event)
    }

    /// Overwrite an event that is still queued. Returns `false`, writing nothing, if it has been
    /// removed or cleared in the meantime.
    pub fn replace(&self, event: &ExportedEvent) -> Result<bool> {
        self.backend.replace(event)
    }

    pub fn get(&self, id: &str) -> Result<Option<ExportedEvent>> {
        self.backend.get(id)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.backend.remove(id)
    }

    /// All pending events, oldest first.
    pub fn all(&self) -> Result<Vec<ExportedEvent>> {
        self.backend.all()
    }

    pub fn count(&self) -> Result<usize> {
        self.backend.count()
    }

    pub fn clear(&self) -> Result<()> {
        log::debug!(target: "beacon", "clearing event store");
        self.backend.clear()
    }
}
