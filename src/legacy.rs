//! One-time import of events queued by the previous storage format.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    event::{ExportedEvent, Project, Route},
    preferences::Preferences,
    repository::EventRepository,
    storage::{Storable, Storage},
    Result,
};

/// Preference flag set once the legacy collection has been imported.
pub const LEGACY_IMPORT_COMPLETED: &str = "legacy_import_completed";

/// Event payload as nested by the legacy format.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyItem {
    pub event_type: Option<String>,
    pub timestamp: Option<f64>,
    pub properties: HashMap<String, Value>,
    pub customer_ids: Option<HashMap<String, String>>,
    pub age: Option<f64>,
}

/// A queued event in the legacy format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyExportedEvent {
    pub id: String,
    #[serde(default)]
    pub tries: u32,
    pub route: Route,
    #[serde(default)]
    pub should_be_skipped: bool,
    /// Missing for events queued before per-event projects existed.
    #[serde(default)]
    pub project: Option<Project>,
    #[serde(default)]
    pub item: LegacyItem,
}

impl Storable for LegacyExportedEvent {
    const COLLECTION: &'static str = "legacy_exported_event";

    fn id(&self) -> &str {
        &self.id
    }
}

impl LegacyExportedEvent {
    fn timestamp(&self) -> f64 {
        self.item.timestamp.unwrap_or(0.0)
    }

    /// Convert into the current entity, addressing it to `fallback` when it carries no project.
    pub fn into_exported(self, fallback: &Project) -> ExportedEvent {
        let project = self.project.unwrap_or_else(|| fallback.clone());
        let timestamp = self.item.timestamp.unwrap_or(0.0);
        let mut event = ExportedEvent::restore(self.id, self.tries, self.route, project, timestamp);
        event.should_be_skipped = self.should_be_skipped;
        event.event_type = self.item.event_type;
        event.properties = self.item.properties;
        event.customer_ids = self.item.customer_ids;
        event.age = self.item.age;
        event
    }
}

/// Result of [`LegacyImporter::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// `true` when the completion flag was already set and nothing was read.
    pub already_completed: bool,
    pub imported: usize,
}

/// Moves legacy records into the [`EventRepository`].
///
/// Records are upserted by id, so an import interrupted before the completion flag was written
/// is safe to rerun.
pub struct LegacyImporter<'a> {
    legacy: &'a dyn Storage<LegacyExportedEvent>,
    repository: &'a EventRepository,
    preferences: &'a dyn Preferences,
    project: &'a Project,
}

impl<'a> LegacyImporter<'a> {
    pub fn new(
        legacy: &'a dyn Storage<LegacyExportedEvent>,
        repository: &'a EventRepository,
        preferences: &'a dyn Preferences,
        project: &'a Project,
    ) -> LegacyImporter<'a> {
        LegacyImporter {
            legacy,
            repository,
            preferences,
            project,
        }
    }

    pub fn run(&self) -> Result<ImportReport> {
        if self.preferences.get_bool(LEGACY_IMPORT_COMPLETED, false) {
            return Ok(ImportReport {
                already_completed: true,
                imported: 0,
            });
        }

        let mut records = self.legacy.all()?;
        records.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));

        let imported = records.len();
        for record in records {
            let event = record.into_exported(self.project);
            log::trace!(target: "beacon", event_id:display = event.id(); "importing legacy event");
            self.repository.update(&event)?;
        }

        self.preferences.set_bool(LEGACY_IMPORT_COMPLETED, true)?;
        self.legacy.clear()?;

        log::debug!(target: "beacon", imported; "legacy import completed");
        Ok(ImportReport {
            already_completed: false,
            imported,
        })
    }
}
