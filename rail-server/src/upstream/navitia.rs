//! Navitia real-time API client.
//!
//! Only the SNCF coverage is used. Navitia timestamps are local times in the
//! basic ISO format `YYYYMMDDTHHMMSS`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDateTime;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::sync::Semaphore;

use super::error::UpstreamError;
use super::{endpoint, fetch_json};

/// Default base URL for Navitia.
const DEFAULT_BASE_URL: &str = "https://api.navitia.io/v1";

/// Coverage region holding the national rail network.
const COVERAGE: &str = "sncf";

/// Navitia timestamp format.
const NAVITIA_DATETIME: &str = "%Y%m%dT%H%M%S";

/// Configuration for the Navitia client.
#[derive(Debug, Clone)]
pub struct NavitiaConfig {
    /// Optional API key, sent as the basic-auth user name
    pub api_key: Option<String>,
    /// Base URL for the API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum concurrent requests (the API enforces a quota)
    pub max_concurrent: usize,
}

impl NavitiaConfig {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            max_concurrent: 8,
        }
    }

    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl Default for NavitiaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything Navitia refers to by id and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamedObject {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Severity {
    pub name: Option<String>,
    /// e.g. `NO_SERVICE`, `SIGNIFICANT_DELAYS`
    pub effect: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Message {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApplicationPeriod {
    pub begin: Option<String>,
    pub end: Option<String>,
}

/// The network object a disruption applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PtObject {
    /// `line`, `stop_area`, `stop_point`, ...
    pub embedded_type: Option<String>,
    pub name: Option<String>,
    pub line: Option<NamedObject>,
    pub stop_area: Option<NamedObject>,
    pub stop_point: Option<NamedObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImpactedObject {
    pub pt_object: Option<PtObject>,
}

/// A service disruption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Disruption {
    pub id: Option<String>,
    pub cause: Option<String>,
    pub severity: Option<Severity>,
    pub message: Option<String>,
    pub messages: Vec<Message>,
    pub application_periods: Vec<ApplicationPeriod>,
    pub impacted_objects: Vec<ImpactedObject>,
    pub updated_at: Option<String>,
}

impl Disruption {
    /// First human-readable message, if any.
    pub fn description(&self) -> Option<&str> {
        self.messages
            .iter()
            .find_map(|m| m.text.as_deref())
            .or(self.message.as_deref())
    }

    pub fn effect(&self) -> &str {
        self.severity
            .as_ref()
            .and_then(|s| s.effect.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StopDateTime {
    pub departure_date_time: Option<String>,
    pub base_departure_date_time: Option<String>,
}

/// A route: one direction of a line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Route {
    pub id: Option<String>,
    pub name: Option<String>,
    pub direction: Option<NamedObject>,
    pub line: Option<NamedObject>,
    pub stop_points: Vec<NamedObject>,
}

/// A scheduled departure from a stop area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Departure {
    pub stop_point: Option<NamedObject>,
    pub route: Option<Route>,
    pub stop_date_time: Option<StopDateTime>,
}

impl Departure {
    /// Real-time departure, falling back to nothing when absent or unparsable.
    pub fn departure_time(&self) -> Option<NaiveDateTime> {
        self.stop_date_time
            .as_ref()?
            .departure_date_time
            .as_deref()
            .and_then(parse_datetime)
    }

    pub fn base_departure_time(&self) -> Option<NaiveDateTime> {
        self.stop_date_time
            .as_ref()?
            .base_departure_date_time
            .as_deref()
            .and_then(parse_datetime)
    }

    /// Whether the real-time departure is later than the timetable.
    pub fn is_delayed(&self) -> bool {
        match (self.departure_time(), self.base_departure_time()) {
            (Some(actual), Some(scheduled)) => actual > scheduled,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DisruptionsResponse {
    #[serde(default)]
    disruptions: Vec<Disruption>,
}

#[derive(Debug, Deserialize)]
struct DeparturesResponse {
    #[serde(default)]
    departures: Vec<Departure>,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

/// Parse a Navitia timestamp, also accepting RFC 3339.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, NAVITIA_DATETIME)
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Client for the Navitia API.
///
/// Uses a semaphore to limit concurrent requests.
#[derive(Debug, Clone)]
pub struct NavitiaClient {
    http: reqwest::Client,
    base_url: Url,
    semaphore: Arc<Semaphore>,
}

impl NavitiaClient {
    pub fn new(config: NavitiaConfig) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();

        // Navitia takes the key as the basic-auth user with an empty password
        if let Some(key) = &config.api_key {
            let credentials = STANDARD.encode(format!("{key}:"));
            let value = HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|_| {
                UpstreamError::Api {
                    status: 0,
                    message: "Invalid API key format".to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        let base_url =
            Url::parse(&config.base_url).map_err(|e| UpstreamError::BadUrl(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// Current disruptions on the network.
    pub async fn disruptions(&self) -> Result<Vec<Disruption>, UpstreamError> {
        let url = endpoint(&self.base_url, &["coverage", COVERAGE, "disruptions"])?;
        let response: DisruptionsResponse = self.get(url).await?;
        Ok(response.disruptions)
    }

    /// Next real-time departures from a stop area.
    pub async fn departures(
        &self,
        stop_area: &str,
        count: u32,
    ) -> Result<Vec<Departure>, UpstreamError> {
        let mut url = endpoint(
            &self.base_url,
            &["coverage", COVERAGE, "stop_areas", stop_area, "departures"],
        )?;
        url.query_pairs_mut()
            .append_pair("count", &count.to_string())
            .append_pair("data_freshness", "realtime");

        let response: DeparturesResponse = self.get(url).await?;
        Ok(response.departures)
    }

    /// Routes of a line, with their stop points.
    pub async fn line_routes(&self, line_id: &str) -> Result<Vec<Route>, UpstreamError> {
        let mut url = endpoint(
            &self.base_url,
            &["coverage", COVERAGE, "lines", line_id, "routes"],
        )?;
        url.query_pairs_mut().append_pair("depth", "3");

        let response: RoutesResponse = self.get(url).await?;
        Ok(response.routes)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, UpstreamError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| UpstreamError::Api {
                status: 0,
                message: "Semaphore closed".to_string(),
            })?;
        fetch_json(&self.http, url).await
    }
}
