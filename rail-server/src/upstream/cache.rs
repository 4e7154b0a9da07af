//! Caching layer for upstream responses.
//!
//! Station data changes rarely and disruptions change on the scale of
//! minutes, so both are held briefly in memory. Real-time departures and line
//! routes always go to Navitia.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;

use crate::domain::UicCode;

use super::error::UpstreamError;
use super::navitia::{Departure, Disruption, NavitiaClient, Route};
use super::opendata::{OpenDataClient, StationPage, StationQuery, StationRecord};

/// Configuration for the caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached entries.
    pub ttl: Duration,

    /// Maximum number of cached entries per cache.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_capacity: 1000,
        }
    }
}

fn build_cache<K, V>(config: &CacheConfig) -> MokaCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    MokaCache::builder()
        .time_to_live(config.ttl)
        .max_capacity(config.max_capacity)
        .build()
}

/// Open-data client with caching of station pages and station lookups.
pub struct CachedOpenDataClient {
    client: OpenDataClient,
    pages: MokaCache<StationQuery, Arc<StationPage>>,
    stations: MokaCache<UicCode, Arc<Option<StationRecord>>>,
}

impl CachedOpenDataClient {
    pub fn new(client: OpenDataClient, config: &CacheConfig) -> Self {
        Self {
            client,
            pages: build_cache(config),
            stations: build_cache(config),
        }
    }

    /// List or search stations, using the cache if available.
    pub async fn stations(&self, query: &StationQuery) -> Result<Arc<StationPage>, UpstreamError> {
        if let Some(cached) = self.pages.get(query).await {
            return Ok(cached);
        }

        let page = Arc::new(self.client.stations(query).await?);
        self.pages.insert(query.clone(), page.clone()).await;
        Ok(page)
    }

    /// Look up one station. Misses are cached too.
    pub async fn station(
        &self,
        uic: &UicCode,
    ) -> Result<Arc<Option<StationRecord>>, UpstreamError> {
        if let Some(cached) = self.stations.get(uic).await {
            return Ok(cached);
        }

        let station = Arc::new(self.client.station(uic).await?);
        self.stations.insert(*uic, station.clone()).await;
        Ok(station)
    }

    /// Access the underlying client for operations that bypass cache.
    pub fn client(&self) -> &OpenDataClient {
        &self.client
    }

    /// Invalidate all cached entries.
    pub fn invalidate_cache(&self) {
        self.pages.invalidate_all();
        self.stations.invalidate_all();
    }
}

/// Navitia client with caching of the disruption list.
pub struct CachedNavitiaClient {
    client: NavitiaClient,
    disruptions: MokaCache<(), Arc<Vec<Disruption>>>,
}

impl CachedNavitiaClient {
    pub fn new(client: NavitiaClient, config: &CacheConfig) -> Self {
        Self {
            client,
            disruptions: build_cache(config),
        }
    }

    /// Current disruptions, using the cache if available.
    pub async fn disruptions(&self) -> Result<Arc<Vec<Disruption>>, UpstreamError> {
        if let Some(cached) = self.disruptions.get(&()).await {
            return Ok(cached);
        }

        let disruptions = Arc::new(self.client.disruptions().await?);
        self.disruptions.insert((), disruptions.clone()).await;
        Ok(disruptions)
    }

    pub async fn departures(
        &self,
        stop_area: &str,
        count: u32,
    ) -> Result<Vec<Departure>, UpstreamError> {
        self.client.departures(stop_area, count).await
    }

    pub async fn line_routes(&self, line_id: &str) -> Result<Vec<Route>, UpstreamError> {
        self.client.line_routes(line_id).await
    }

    /// Access the underlying client for operations that bypass cache.
    pub fn client(&self) -> &NavitiaClient {
        &self.client
    }

    pub fn invalidate_cache(&self) {
        self.disruptions.invalidate_all();
    }
}
