//! Outbound analytics events and the project they are addressed to.
use std::{collections::HashMap, str::FromStr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::{Error, Result};

/// Where an event is delivered: API base URL, project token and authorization.
///
/// Captured into every [`ExportedEvent`] at enqueue time, so an event keeps flushing to the
/// project it was tracked under even if the client is reconfigured afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub base_url: String,
    pub project_token: String,
    /// Value of the `Authorization` header, e.g. `"Token abc"`.
    #[serde(default)]
    pub authorization: Option<String>,
}

impl Project {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.exponea.com";

    pub fn new(project_token: impl Into<String>) -> Project {
        Project {
            base_url: Project::DEFAULT_BASE_URL.to_owned(),
            project_token: project_token.into(),
            authorization: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Project {
        self.base_url = base_url.into();
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Project {
        self.authorization = Some(authorization.into());
        self
    }

    /// Full endpoint URL for `route` under this project. The token is percent-encoded as a
    /// single path segment.
    pub fn endpoint(&self, route: Route) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(Error::InvalidBaseUrl)?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(route.segments(&self.project_token));
        Ok(url)
    }
}

/// API endpoint an event targets.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[display(fmt = "track_events")]
    TrackEvents,
    #[display(fmt = "track_customers")]
    TrackCustomers,
    #[display(fmt = "track_campaign")]
    TrackCampaign,
}

impl Route {
    /// Path segments below the API base URL.
    fn segments(self, project_token: &str) -> Vec<&str> {
        let resource: &[&str] = match self {
            Route::TrackEvents => &["customers", "events"],
            Route::TrackCustomers => &["customers"],
            Route::TrackCampaign => &["campaigns", "clicks"],
        };
        let mut segments = vec!["track", "v2", "projects", project_token];
        segments.extend_from_slice(resource);
        segments
    }
}

/// Error returned when a stored route name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route `{0}`")]
pub struct UnknownRoute(pub String);

impl FromStr for Route {
    type Err = UnknownRoute;

    fn from_str(s: &str) -> std::result::Result<Route, UnknownRoute> {
        match s {
            "track_events" => Ok(Route::TrackEvents),
            "track_customers" => Ok(Route::TrackCustomers),
            "track_campaign" => Ok(Route::TrackCampaign),
            other => Err(UnknownRoute(other.to_owned())),
        }
    }
}

/// One durable outbound analytics record awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEvent {
    id: String,
    tries: u32,
    route: Route,
    project: Project,
    pub should_be_skipped: bool,
    pub event_type: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub properties: HashMap<String, Value>,
    pub customer_ids: Option<HashMap<String, String>>,
    /// Auxiliary age in seconds, used by the campaign route. `None` until known.
    pub age: Option<f64>,
    /// Classification independent of the route (e.g. `"push_delivered"`).
    pub sdk_event_type: Option<String>,
}

impl ExportedEvent {
    /// Create a new event with a freshly generated id and zero tries.
    pub fn new(project: Project, route: Route, timestamp: f64) -> ExportedEvent {
        ExportedEvent::restore(uuid::Uuid::new_v4().to_string(), 0, route, project, timestamp)
    }

    /// Rebuild an event whose identity already exists (storage rows, legacy imports).
    pub(crate) fn restore(
        id: String,
        tries: u32,
        route: Route,
        project: Project,
        timestamp: f64,
    ) -> ExportedEvent {
        ExportedEvent {
            id,
            tries,
            route,
            project,
            should_be_skipped: false,
            event_type: None,
            timestamp,
            properties: HashMap::new(),
            customer_ids: None,
            age: None,
            sdk_event_type: None,
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> ExportedEvent {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, Value>) -> ExportedEvent {
        self.properties = properties;
        self
    }

    pub fn with_customer_ids(mut self, customer_ids: HashMap<String, String>) -> ExportedEvent {
        self.customer_ids = Some(customer_ids);
        self
    }

    pub fn with_sdk_event_type(mut self, sdk_event_type: impl Into<String>) -> ExportedEvent {
        self.sdk_event_type = Some(sdk_event_type.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Count one more failed delivery attempt.
    pub(crate) fn record_failed_attempt(&mut self) {
        self.tries = self.tries.saturating_add(1);
    }

    /// JSON body posted to this event's route.
    pub(crate) fn request_body(&self, now: f64) -> Value {
        let customer_ids = self.customer_ids.clone().unwrap_or_default();
        match self.route {
            Route::TrackEvents => json!({
                "customer_ids": customer_ids,
                "properties": self.properties,
                "event_type": self.event_type,
                "timestamp": self.timestamp,
            }),
            Route::TrackCustomers => json!({
                "customer_ids": customer_ids,
                "properties": self.properties,
            }),
            Route::TrackCampaign => {
                let mut properties = self.properties.clone();
                let url = properties.remove("url").unwrap_or(Value::Null);
                json!({
                    "url": url,
                    "properties": properties,
                    "age": self.age.unwrap_or((now - self.timestamp).max(0.0)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{ExportedEvent, Project, Route};

    #[test]
    fn endpoint_substitutes_project_token() {
        let project = Project::new("token-a").with_base_url("https://api.example.com/");
        assert_eq!(
            project.endpoint(Route::TrackEvents).unwrap().as_str(),
            "https://api.example.com/track/v2/projects/token-a/customers/events"
        );
        assert_eq!(
            project.endpoint(Route::TrackCampaign).unwrap().as_str(),
            "https://api.example.com/track/v2/projects/token-a/campaigns/clicks"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_and_escapes_token() {
        let project = Project::new("a/b?c#d").with_base_url("https://api.example.com/proxy");
        assert_eq!(
            project.endpoint(Route::TrackCustomers).unwrap().as_str(),
            "https://api.example.com/proxy/track/v2/projects/a%2Fb%3Fc%23d/customers"
        );
        assert_eq!(
            Project::new("token")
                .endpoint(Route::TrackEvents)
                .unwrap()
                .as_str(),
            "https://api.exponea.com/track/v2/projects/token/customers/events"
        );
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let project = Project::new("token").with_base_url("not a url");
        assert!(project.endpoint(Route::TrackCustomers).is_err());
        let project = Project::new("token").with_base_url("mailto:team@example.com");
        assert!(project.endpoint(Route::TrackCustomers).is_err());
    }

    #[test]
    fn route_names_round_trip_through_display() {
        for route in [Route::TrackEvents, Route::TrackCustomers, Route::TrackCampaign] {
            assert_eq!(route.to_string().parse::<Route>().unwrap(), route);
        }
        assert!("track_everything".parse::<Route>().is_err());
    }

    #[test]
    fn new_events_get_unique_ids() {
        let a = ExportedEvent::new(Project::new("t"), Route::TrackEvents, 1.0);
        let b = ExportedEvent::new(Project::new("t"), Route::TrackEvents, 1.0);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.tries(), 0);
    }

    #[test]
    fn campaign_body_moves_url_and_computes_age() {
        let event = ExportedEvent::new(Project::new("t"), Route::TrackCampaign, 100.0)
            .with_properties(HashMap::from([
                ("url".to_owned(), json!("https://example.com/?utm_source=x")),
                ("platform".to_owned(), json!("rust")),
            ]));

        let body = event.request_body(130.0);
        assert_eq!(body["url"], json!("https://example.com/?utm_source=x"));
        assert_eq!(body["age"], json!(30.0));
        assert_eq!(body["properties"], json!({"platform": "rust"}));
    }

    #[test]
    fn event_body_carries_type_and_customer_ids() {
        let event = ExportedEvent::new(Project::new("t"), Route::TrackEvents, 5.0)
            .with_event_type("purchase")
            .with_customer_ids(HashMap::from([("registered".to_owned(), "jane".to_owned())]));

        let body = event.request_body(10.0);
        assert_eq!(body["event_type"], json!("purchase"));
        assert_eq!(body["customer_ids"], json!({"registered": "jane"}));
        assert_eq!(body["timestamp"], json!(5.0));
    }
}
