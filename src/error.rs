use std::sync::Arc;

use thiserror::Error;

use crate::filter::FilterError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by storage, rule evaluation and delivery.
///
/// None of these reach application code through the tracking API: [`crate::Client`] logs them
/// and carries on. They are returned from the lower-level components ([`crate::EventRepository`],
/// [`crate::EventFilter`], backends) so that callers embedding those directly can react.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The relational backend failed.
    #[error(transparent)]
    Sqlite(Arc<rusqlite::Error>),

    /// An I/O error, e.g. from the document backend or the preferences file.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A stored record or preferences file could not be (de)serialized.
    #[error(transparent)]
    Serialization(Arc<serde_json::Error>),

    /// The project base URL cannot be turned into an endpoint.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Transport-level network failure.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The event store was written by a newer schema than this build knows about.
    #[error("event store schema version {found} is newer than supported version {latest}")]
    UnsupportedSchemaVersion {
        /// Version recorded in the store.
        found: u32,
        /// Latest version this build can migrate to.
        latest: u32,
    },

    /// Rule definition or evaluation error.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The periodic flush thread panicked. This should normally never happen.
    #[error("flush thread panicked")]
    FlushThreadPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
