//! Network collaborators used by the flush pipeline.
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

/// Status of a completed HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts request bodies to the API.
///
/// Implementations own timeouts, TLS and compression. Returning `Err` means no response was
/// received at all; an HTTP error status is an `Ok` response.
pub trait NetworkTransport: Send + Sync {
    fn post(&self, url: &Url, headers: &[(&str, &str)], body: &Value) -> Result<Response>;
}

impl<T: Fn(&Url, &[(&str, &str)], &Value) -> Result<Response> + Send + Sync> NetworkTransport
    for T
{
    fn post(&self, url: &Url, headers: &[(&str, &str)], body: &Value) -> Result<Response> {
        self(url, headers, body)
    }
}

/// [`NetworkTransport`] backed by a blocking `reqwest` client.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<HttpTransport> {
        HttpTransport::with_timeout(HttpTransport::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<HttpTransport> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl NetworkTransport for HttpTransport {
    fn post(&self, url: &Url, headers: &[(&str, &str)], body: &Value) -> Result<Response> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    header_map.insert(name, value);
                }
                _ => {
                    log::warn!(target: "beacon", header = *name; "skipping invalid request header");
                }
            }
        }

        let response = self
            .client
            .post(url.clone())
            .headers(header_map)
            .json(body)
            .send()?;
        Ok(Response {
            status: response.status().as_u16(),
        })
    }
}

/// Stand-in used when no HTTP client could be built: every request fails and stays queued.
pub(crate) struct UnavailableTransport(pub(crate) Error);

impl NetworkTransport for UnavailableTransport {
    fn post(&self, _url: &Url, _headers: &[(&str, &str)], _body: &Value) -> Result<Response> {
        Err(self.0.clone())
    }
}

/// Tells whether the device currently has network connectivity.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

impl<T: Fn() -> bool + Send + Sync> Connectivity for T {
    fn is_online(&self) -> bool {
        self()
    }
}

/// Connectivity check for environments without one: always online.
pub(crate) struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}
