use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::Value;

use crate::{
    clock::{Clock, SystemClock},
    config::FlushMode,
    event::{ExportedEvent, Project, Route},
    flush::{FlushListener, FlushManager},
    flush_thread::{FlushThread, FlushThreadConfig},
    legacy::{LegacyExportedEvent, LegacyImporter},
    network::{AlwaysOnline, HttpTransport, NetworkTransport, UnavailableTransport},
    preferences::{FilePreferences, MemoryPreferences, Preferences},
    repository::{EventRepository, OpenedRepository},
    storage::DocumentBackend,
    telemetry::{NoopTelemetry, Telemetry},
    ClientConfig,
};

/// Preferences file created under the legacy store root when no preferences are configured.
pub(crate) const DEFAULT_PREFERENCES_FILE: &str = "beacon_preferences.json";

/// Event properties as sent to the API.
pub type Properties = HashMap<String, Value>;

/// Entry point of the SDK: tracks events into the durable queue and flushes them.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// Tracking methods never fail from the caller's point of view. Storage problems are logged and
/// reported to the configured [`Telemetry`].
///
/// # Examples
/// ```
/// # use beacon::{Client, ClientConfig, Project};
/// let client = Client::new(ClientConfig::new(Project::new("project-token")));
/// client.track_event("app_open", Default::default(), None);
/// ```
pub struct Client {
    repository: Arc<EventRepository>,
    flush_manager: FlushManager,
    project: RwLock<Project>,
    customer_ids: RwLock<HashMap<String, String>>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
    flush_mode: FlushMode,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Never fails: an event store that cannot be opened is replaced by an in-memory one, and a
    /// failed legacy import is retried on the next start.
    pub fn new(config: ClientConfig) -> Self {
        let telemetry: Arc<dyn Telemetry> = config
            .telemetry
            .unwrap_or_else(|| Arc::new(NoopTelemetry));

        let opened = EventRepository::open(&config.storage);
        if let OpenedRepository::Fallback { cause, .. } = &opened {
            telemetry.report_error("event store unavailable, events are kept in memory", cause);
        }
        let repository = Arc::new(opened.into_repository());

        // Without an explicit location, the import marker lives next to the legacy store so that
        // a completed import is remembered across restarts.
        let preferences_path = config.preferences_path.or_else(|| {
            config
                .legacy_store_path
                .as_ref()
                .map(|root| root.join(DEFAULT_PREFERENCES_FILE))
        });
        let preferences: Arc<dyn Preferences> = match (config.preferences, preferences_path) {
            (Some(preferences), _) => preferences,
            (None, Some(path)) => match FilePreferences::open(path) {
                Ok(preferences) => Arc::new(preferences),
                Err(err) => {
                    log::warn!(target: "beacon", "cannot open preferences, using memory: {}", err);
                    telemetry.report_error("preferences unavailable", &err);
                    Arc::new(MemoryPreferences::new())
                }
            },
            (None, None) => Arc::new(MemoryPreferences::new()),
        };

        if let Some(path) = &config.legacy_store_path {
            let imported = DocumentBackend::<LegacyExportedEvent>::open(path).and_then(|legacy| {
                LegacyImporter::new(&legacy, &repository, preferences.as_ref(), &config.project)
                    .run()
            });
            if let Err(err) = imported {
                log::warn!(target: "beacon", "legacy import failed: {}", err);
                telemetry.report_error("legacy import failed", &err);
            }
        }

        let transport: Arc<dyn NetworkTransport> = match config.transport {
            Some(transport) => transport,
            None => match HttpTransport::new() {
                Ok(transport) => Arc::new(transport),
                Err(err) => {
                    log::warn!(target: "beacon", "cannot create HTTP client: {}", err);
                    telemetry.report_error("HTTP client unavailable", &err);
                    Arc::new(UnavailableTransport(err))
                }
            },
        };
        let clock: Arc<dyn Clock> = config.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let flush_manager = FlushManager::new(
            repository.clone(),
            transport,
            config
                .connectivity
                .unwrap_or_else(|| Arc::new(AlwaysOnline)),
            clock.clone(),
            config.max_tries,
        );

        Client {
            repository,
            flush_manager,
            project: RwLock::new(config.project),
            customer_ids: RwLock::new(HashMap::new()),
            clock,
            telemetry,
            flush_mode: config.flush_mode,
        }
    }

    /// Queue a custom event. `timestamp` defaults to now.
    pub fn track_event(&self, event_type: &str, properties: Properties, timestamp: Option<f64>) {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let event = ExportedEvent::new(self.project(), Route::TrackEvents, timestamp)
            .with_event_type(event_type)
            .with_properties(properties)
            .with_customer_ids(self.customer_ids());
        self.enqueue(event);
    }

    /// Merge `customer_ids` into the current identity and queue a customer update.
    pub fn identify_customer(&self, customer_ids: HashMap<String, String>, properties: Properties) {
        {
            let mut current = self
                .customer_ids
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            current.extend(customer_ids);
        }
        let event = ExportedEvent::new(self.project(), Route::TrackCustomers, self.clock.now())
            .with_properties(properties)
            .with_customer_ids(self.customer_ids());
        self.enqueue(event);
    }

    /// Queue a campaign click for `url`. The click's age is computed when it is sent.
    pub fn track_campaign_click(&self, url: &str, mut properties: Properties) {
        properties.insert("url".to_owned(), Value::from(url));
        let event = ExportedEvent::new(self.project(), Route::TrackCampaign, self.clock.now())
            .with_properties(properties)
            .with_sdk_event_type("campaign_click");
        self.enqueue(event);
    }

    /// Start a flush, or join the running one. Does not block.
    pub fn flush(&self, listener: Option<FlushListener>) {
        self.flush_manager.flush_now(listener);
    }

    /// Forget the current customer and drop every queued event.
    pub fn anonymize(&self) {
        self.customer_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Err(err) = self.repository.clear() {
            log::warn!(target: "beacon", "cannot clear queued events: {}", err);
            self.telemetry.report_error("anonymize failed", &err);
        }
    }

    /// Address subsequently tracked events to `project`. Queued events keep their own project.
    pub fn set_project(&self, project: Project) {
        *self.project.write().unwrap_or_else(PoisonError::into_inner) = project;
    }

    pub fn project(&self) -> Project {
        self.project
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn customer_ids(&self) -> HashMap<String, String> {
        self.customer_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flush periodically on a background thread until the returned handle is stopped.
    pub fn start_flush_thread(&self, config: FlushThreadConfig) -> std::io::Result<FlushThread> {
        FlushThread::start(self.flush_manager.clone(), config)
    }

    pub fn repository(&self) -> &EventRepository {
        &self.repository
    }

    pub fn flush_manager(&self) -> &FlushManager {
        &self.flush_manager
    }

    fn enqueue(&self, event: ExportedEvent) {
        if let Err(err) = self.repository.add(&event) {
            log::warn!(target: "beacon",
                       event_id:display = event.id(),
                       route:display = event.route();
                       "cannot queue event: {}", err);
            self.telemetry.report_error("cannot queue event", &err);
            return;
        }
        if self.flush_mode == FlushMode::Immediate {
            self.flush_manager.flush_now(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fs,
        sync::{mpsc, Arc, Mutex},
        time::Duration,
    };

    use serde_json::{json, Value};
    use url::Url;

    use crate::{
        event::{Project, Route},
        flush::FlushReport,
        legacy::{LegacyExportedEvent, LegacyItem},
        network::Response,
        preferences::MemoryPreferences,
        storage::{DocumentBackend, Storage},
        BackendType, Client, ClientConfig, FlushMode, Result, StorageConfig,
    };

    #[derive(Clone, Default)]
    struct RecordingTransport {
        requests: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl crate::NetworkTransport for RecordingTransport {
        fn post(&self, url: &Url, _headers: &[(&str, &str)], body: &Value) -> Result<Response> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            Ok(Response { status: 200 })
        }
    }

    fn config(transport: &RecordingTransport) -> ClientConfig {
        let mut config = ClientConfig::new(Project::new("token"));
        config
            .transport(transport.clone())
            .clock(|| 1000.0_f64)
            .preferences(MemoryPreferences::new());
        config
    }

    fn flush_and_wait(client: &Client) -> FlushReport {
        let (sender, receiver) = mpsc::channel();
        client.flush(Some(Box::new(move |report: &FlushReport| {
            let _ = sender.send(*report);
        })));
        receiver.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn tracked_events_are_queued_with_identity() {
        let transport = RecordingTransport::default();
        let client = config(&transport).to_client();

        client.identify_customer(
            HashMap::from([("registered".to_owned(), "joe".to_owned())]),
            HashMap::from([("plan".to_owned(), json!("pro"))]),
        );
        client.track_event("purchase", HashMap::new(), Some(5.0));

        let events = client.repository().all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].route(), Route::TrackCustomers);
        assert_eq!(events[1].event_type.as_deref(), Some("purchase"));
        assert_eq!(events[1].timestamp, 5.0);
        assert_eq!(
            events[1].customer_ids.as_ref().unwrap()["registered"],
            "joe"
        );
    }

    #[test]
    fn flush_sends_queued_events() {
        let transport = RecordingTransport::default();
        let client = config(&transport).to_client();
        client.track_event("a", HashMap::new(), None);
        client.track_campaign_click("https://example.com/c", HashMap::new());

        let report = flush_and_wait(&client);

        assert_eq!(report.sent, 2);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].1["timestamp"], json!(1000.0));
        assert!(requests[1].0.ends_with("/campaigns/clicks"));
        assert_eq!(requests[1].1["url"], json!("https://example.com/c"));
    }

    #[test]
    fn set_project_only_affects_new_events() {
        let transport = RecordingTransport::default();
        let client = config(&transport).to_client();
        client.track_event("before", HashMap::new(), None);
        client.set_project(Project::new("other"));
        client.track_event("after", HashMap::new(), None);

        flush_and_wait(&client);

        let requests = transport.requests.lock().unwrap();
        assert!(requests[0].0.contains("/projects/token/"));
        assert!(requests[1].0.contains("/projects/other/"));
    }

    #[test]
    fn immediate_mode_flushes_after_tracking() {
        let transport = RecordingTransport::default();
        let mut config = config(&transport);
        config.flush_mode(FlushMode::Immediate);
        let client = config.to_client();
        let (sender, receiver) = mpsc::channel();
        client
            .flush_manager()
            .set_on_flush_finish(move |report: &FlushReport| {
                let _ = sender.send(*report);
            });

        client.track_event("a", HashMap::new(), None);

        let report = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.sent, 1);
    }

    #[test]
    fn anonymize_clears_queue_and_identity() {
        let transport = RecordingTransport::default();
        let client = config(&transport).to_client();
        client.identify_customer(
            HashMap::from([("registered".to_owned(), "joe".to_owned())]),
            HashMap::new(),
        );
        client.anonymize();

        assert_eq!(client.repository().count().unwrap(), 0);
        assert!(client.customer_ids().is_empty());
    }

    #[test]
    fn unusable_store_falls_back_and_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        fs::write(&path, b"definitely not sqlite").unwrap();

        let reports = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport::default();
        let mut config = config(&transport);
        {
            let reports = reports.clone();
            config
                .storage(StorageConfig::sqlite(&path))
                .telemetry(move |context: &str, _error: &crate::Error| {
                    reports.lock().unwrap().push(context.to_owned());
                });
        }
        let client = config.to_client();

        assert_eq!(client.repository().backend_type(), BackendType::Memory);
        client.track_event("a", HashMap::new(), None);
        assert_eq!(client.repository().count().unwrap(), 1);
        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn legacy_events_are_imported_on_start() {
        let dir = tempfile::tempdir().unwrap();
        {
            let legacy = DocumentBackend::<LegacyExportedEvent>::open(dir.path()).unwrap();
            legacy
                .add(&LegacyExportedEvent {
                    id: "legacy-1".to_owned(),
                    tries: 0,
                    route: Route::TrackEvents,
                    should_be_skipped: false,
                    project: None,
                    item: LegacyItem {
                        event_type: Some("old".to_owned()),
                        timestamp: Some(1.0),
                        ..LegacyItem::default()
                    },
                })
                .unwrap();
        }

        let transport = RecordingTransport::default();
        let mut config = config(&transport);
        config.legacy_store_path(dir.path());
        let client = config.to_client();

        let event = client.repository().get("legacy-1").unwrap().unwrap();
        assert_eq!(event.project(), &Project::new("token"));
        let legacy = DocumentBackend::<LegacyExportedEvent>::open(dir.path()).unwrap();
        assert_eq!(legacy.count().unwrap(), 0);
    }

    #[test]
    fn legacy_import_is_not_repeated_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let legacy_event = LegacyExportedEvent {
            id: "legacy-1".to_owned(),
            tries: 0,
            route: Route::TrackEvents,
            should_be_skipped: false,
            project: None,
            item: LegacyItem {
                event_type: Some("old".to_owned()),
                timestamp: Some(1.0),
                ..LegacyItem::default()
            },
        };
        let legacy = DocumentBackend::<LegacyExportedEvent>::open(dir.path()).unwrap();
        legacy.add(&legacy_event).unwrap();

        let transport = RecordingTransport::default();
        let start = || {
            let mut config = ClientConfig::new(Project::new("token"));
            config
                .transport(transport.clone())
                .clock(|| 1000.0_f64)
                .legacy_store_path(dir.path());
            config.to_client()
        };

        let first = start();
        assert_eq!(first.repository().count().unwrap(), 1);
        assert!(dir.path().join(super::DEFAULT_PREFERENCES_FILE).is_file());

        // The legacy store was not cleaned up, e.g. the process died right after the import.
        legacy.add(&legacy_event).unwrap();
        let second = start();
        assert_eq!(second.repository().count().unwrap(), 0);
    }
}
