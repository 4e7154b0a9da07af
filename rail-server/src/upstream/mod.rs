//! Clients for the third-party rail data providers.
//!
//! - [`OpenDataClient`]: the SNCF open-data portal, used for the station list.
//! - [`NavitiaClient`]: real-time departures, line routes and disruptions.
//!
//! Both are wrapped by the moka-backed caches in [`cache`] before being
//! handed to the web layer.

mod cache;
mod error;
mod navitia;
mod opendata;

use reqwest::Url;
use serde::de::DeserializeOwned;

pub use cache::{CacheConfig, CachedNavitiaClient, CachedOpenDataClient};
pub use error::UpstreamError;
pub use navitia::{
    ApplicationPeriod, Departure, Disruption, ImpactedObject, Message, NamedObject,
    NavitiaClient, NavitiaConfig, PtObject, Route, Severity, StopDateTime, parse_datetime,
};
pub use opendata::{
    GeoPoint, OpenDataClient, OpenDataConfig, StationPage, StationQuery, StationRecord,
};

/// Append path segments to a base URL, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| UpstreamError::BadUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// GET a JSON document, mapping error statuses onto [`UpstreamError`].
async fn fetch_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: Url,
) -> Result<T, UpstreamError> {
    let response = http.get(url).send().await?;
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(UpstreamError::Unauthorized);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Api {
            status: status.as_u16(),
            message: body.chars().take(500).collect(),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| UpstreamError::Json {
        message: e.to_string(),
    })
}
