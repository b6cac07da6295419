use std::{path::PathBuf, sync::Arc};

use crate::{
    clock::Clock,
    event::Project,
    flush::DEFAULT_MAX_TRIES,
    network::{Connectivity, NetworkTransport},
    preferences::Preferences,
    storage::StorageConfig,
    telemetry::Telemetry,
    Client,
};

/// When tracked events are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Only on [`Client::flush`], connectivity changes or a [`crate::FlushThread`].
    #[default]
    Manual,
    /// After every tracked event.
    Immediate,
}

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) project: Project,
    pub(crate) storage: StorageConfig,
    pub(crate) max_tries: u32,
    pub(crate) flush_mode: FlushMode,
    pub(crate) legacy_store_path: Option<PathBuf>,
    pub(crate) preferences_path: Option<PathBuf>,
    pub(crate) transport: Option<Arc<dyn NetworkTransport>>,
    pub(crate) connectivity: Option<Arc<dyn Connectivity>>,
    pub(crate) clock: Option<Arc<dyn Clock>>,
    pub(crate) preferences: Option<Arc<dyn Preferences>>,
    pub(crate) telemetry: Option<Arc<dyn Telemetry>>,
}

impl ClientConfig {
    /// Create a default configuration tracking to `project`, with an in-memory event store.
    ///
    /// ```
    /// # use beacon::{ClientConfig, Project};
    /// ClientConfig::new(Project::new("project-token"));
    /// ```
    pub fn new(project: Project) -> Self {
        ClientConfig {
            project,
            storage: StorageConfig::memory(),
            max_tries: DEFAULT_MAX_TRIES,
            flush_mode: FlushMode::default(),
            legacy_store_path: None,
            preferences_path: None,
            transport: None,
            connectivity: None,
            clock: None,
            preferences: None,
            telemetry: None,
        }
    }

    /// Where and how to keep queued events.
    ///
    /// ```
    /// # use beacon::{ClientConfig, Project, StorageConfig};
    /// let mut config = ClientConfig::new(Project::new("project-token"));
    /// config.storage(StorageConfig::sqlite("/data/beacon/events.db"));
    /// ```
    pub fn storage(&mut self, storage: StorageConfig) -> &mut Self {
        self.storage = storage;
        self
    }

    /// Failed attempts after which an event is dropped. Defaults to [`DEFAULT_MAX_TRIES`].
    pub fn max_tries(&mut self, max_tries: u32) -> &mut Self {
        self.max_tries = max_tries;
        self
    }

    pub fn flush_mode(&mut self, flush_mode: FlushMode) -> &mut Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Root directory of the legacy event store to import on startup.
    ///
    /// Unless [`ClientConfig::preferences`] or [`ClientConfig::preferences_path`] is set, the
    /// import marker is kept in `beacon_preferences.json` under this directory.
    pub fn legacy_store_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.legacy_store_path = Some(path.into());
        self
    }

    /// Keep SDK preferences in a JSON file at `path`. Ignored if [`ClientConfig::preferences`]
    /// is set.
    pub fn preferences_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.preferences_path = Some(path.into());
        self
    }

    /// Override the HTTP transport. Defaults to [`crate::HttpTransport`].
    pub fn transport(&mut self, transport: impl NetworkTransport + 'static) -> &mut Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Connectivity check consulted before each flush. Defaults to always online.
    ///
    /// ```
    /// # use beacon::{ClientConfig, Project};
    /// let mut config = ClientConfig::new(Project::new("project-token"));
    /// config.connectivity(|| true);
    /// ```
    pub fn connectivity(&mut self, connectivity: impl Connectivity + 'static) -> &mut Self {
        self.connectivity = Some(Arc::new(connectivity));
        self
    }

    /// Defaults to [`crate::SystemClock`].
    pub fn clock(&mut self, clock: impl Clock + 'static) -> &mut Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn preferences(&mut self, preferences: impl Preferences + 'static) -> &mut Self {
        self.preferences = Some(Arc::new(preferences));
        self
    }

    /// Receives recovered failures such as the event store falling back to memory.
    ///
    /// ```
    /// # use beacon::{ClientConfig, Project};
    /// let mut config = ClientConfig::new(Project::new("project-token"));
    /// config.telemetry(|context: &str, error: &beacon::Error| {
    ///     eprintln!("{context}: {error}");
    /// });
    /// ```
    pub fn telemetry(&mut self, telemetry: impl Telemetry + 'static) -> &mut Self {
        self.telemetry = Some(Arc::new(telemetry));
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
