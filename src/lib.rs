//! Durable event tracking core for a marketing SDK.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that turns tracking calls into [`ExportedEvent`]s and
//! appends them to an [`EventRepository`], a durable queue backed by one of several
//! [storage backends](storage). A [`FlushManager`] drains the queue to the API, one cycle at a
//! time, retrying failed events a bounded number of times.
//!
//! Server-delivered rules are expressed as [`EventFilter`]s, a small typed expression language
//! with a fixed JSON wire format. See the [`filter`] module.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Tracking never fails from the caller's point of view: storage and network problems are
//! logged, reported to [`Telemetry`] and only affect eventual delivery. Lower-level APIs such as
//! [`EventRepository`] and [`EventFilter::passes`] return errors for the caller to handle.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, all under the `beacon` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod clock;
mod config;
mod error;
mod event;
pub mod filter;
mod flush;
mod flush_thread;
mod legacy;
mod network;
mod preferences;
mod repository;
pub mod storage;
mod telemetry;

pub use client::{Client, Properties};
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, FlushMode};
pub use error::{Error, Result};
pub use event::{ExportedEvent, Project, Route, UnknownRoute};
pub use filter::{EventFilter, EventFilterEvent, EventPropertyFilter, FilterError, RuleSet};
pub use flush::{
    FlushListener, FlushManager, FlushOutcome, FlushReport, DEFAULT_MAX_TRIES,
    PERMANENT_FAILURE_CODES,
};
pub use flush_thread::{FlushThread, FlushThreadConfig};
pub use legacy::{
    ImportReport, LegacyExportedEvent, LegacyImporter, LegacyItem, LEGACY_IMPORT_COMPLETED,
};
pub use network::{Connectivity, HttpTransport, NetworkTransport, Response};
pub use preferences::{FilePreferences, MemoryPreferences, Preferences};
pub use repository::{EventRepository, OpenedRepository};
pub use storage::{BackendType, StorageConfig};
pub use telemetry::Telemetry;
