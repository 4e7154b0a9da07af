//! SNCF open-data (Opendatasoft explore v2.1) client.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::domain::UicCode;

use super::error::UpstreamError;
use super::{endpoint, fetch_json};

/// Default base URL for the SNCF open-data portal.
const DEFAULT_BASE_URL: &str = "https://data.sncf.com/api/explore/v2.1";

/// Dataset listing every station of the national network.
const STATIONS_DATASET: &str = "liste-des-gares";

/// Configuration for the open-data client.
#[derive(Debug, Clone)]
pub struct OpenDataConfig {
    /// Optional API key, sent as `Authorization: apikey <key>`
    pub api_key: Option<String>,
    /// Base URL for the API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenDataConfig {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
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

impl Default for OpenDataConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Geographic position of a station.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One record of the `liste-des-gares` dataset.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StationRecord {
    pub libelle: Option<String>,
    pub code_uic: Option<String>,
    pub departement_libellemin: Option<String>,
    pub commune: Option<String>,
    pub coordonnees_geographiques: Option<GeoPoint>,
    pub adresse_cp: Option<String>,
    /// `"O"` when the station serves passengers
    pub voyageurs: Option<String>,
    /// `"O"` when the station handles freight
    pub fret: Option<String>,
}

impl StationRecord {
    pub fn serves_passengers(&self) -> bool {
        self.voyageurs.as_deref() == Some("O")
    }

    pub fn handles_freight(&self) -> bool {
        self.fret.as_deref() == Some("O")
    }
}

/// Records may come flat (v2.1) or wrapped in `record.fields` (v1 style).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStationItem {
    Wrapped { record: WrappedFields },
    Flat(StationRecord),
}

#[derive(Debug, Deserialize)]
struct WrappedFields {
    fields: StationRecord,
}

impl From<RawStationItem> for StationRecord {
    fn from(item: RawStationItem) -> Self {
        match item {
            RawStationItem::Wrapped { record } => record.fields,
            RawStationItem::Flat(record) => record,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    total_count: Option<u64>,
    #[serde(default)]
    results: Vec<RawStationItem>,
}

/// A page of station records.
#[derive(Debug, Clone, PartialEq)]
pub struct StationPage {
    pub stations: Vec<StationRecord>,
    /// Matching records across all pages
    pub total: u64,
}

/// Parameters for a station listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationQuery {
    pub limit: u32,
    pub offset: u32,
    /// Name filter; when set, `offset` is ignored
    pub search: Option<String>,
}

/// Client for the SNCF open-data API.
#[derive(Debug, Clone)]
pub struct OpenDataClient {
    http: reqwest::Client,
    base_url: Url,
}

impl OpenDataClient {
    pub fn new(config: OpenDataConfig) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();

        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("apikey {key}")).map_err(|_| {
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

        Ok(Self { http, base_url })
    }

    /// List or search stations.
    pub async fn stations(&self, query: &StationQuery) -> Result<StationPage, UpstreamError> {
        let mut url = self.records_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &query.limit.to_string());
            match &query.search {
                Some(search) => {
                    pairs.append_pair("where", &format!("libelle like '{}'", odsql_literal(search)));
                }
                None => {
                    pairs.append_pair("offset", &query.offset.to_string());
                }
            }
        }

        self.fetch_page(url).await
    }

    /// Look up one station by UIC code.
    pub async fn station(&self, uic: &UicCode) -> Result<Option<StationRecord>, UpstreamError> {
        let mut url = self.records_url()?;
        url.query_pairs_mut()
            .append_pair("where", &format!("code_uic = '{uic}'"))
            .append_pair("limit", "1");

        let page = self.fetch_page(url).await?;
        Ok(page
            .stations
            .into_iter()
            .find(|s| s.code_uic.as_deref() == Some(uic.as_str())))
    }

    fn records_url(&self) -> Result<Url, UpstreamError> {
        endpoint(
            &self.base_url,
            &["catalog", "datasets", STATIONS_DATASET, "records"],
        )
    }

    async fn fetch_page(&self, url: Url) -> Result<StationPage, UpstreamError> {
        let response: RecordsResponse = fetch_json(&self.http, url).await?;

        let stations: Vec<StationRecord> =
            response.results.into_iter().map(StationRecord::from).collect();
        let total = response.total_count.unwrap_or(stations.len() as u64);

        Ok(StationPage { stations, total })
    }
}

/// Strip characters that would end an ODSQL string literal.
fn odsql_literal(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, '\'' | '"' | '\\')).collect()
}
