//! Application state for the web layer.

use std::sync::Arc;

use crate::store::ReferenceStore;
use crate::upstream::{CachedNavitiaClient, CachedOpenDataClient};

use super::gate::Gate;

/// Shared application state.
///
/// Everything is built once at startup and injected here; handlers hold no
/// other shared state.
#[derive(Clone)]
pub struct AppState {
    /// Authentication, rate limiting and auditing
    pub gate: Gate,

    /// Lines and trains
    pub store: Arc<dyn ReferenceStore>,

    /// Cached SNCF open-data client
    pub opendata: Arc<CachedOpenDataClient>,

    /// Cached Navitia client
    pub navitia: Arc<CachedNavitiaClient>,
}

impl AppState {
    /// Create a new app state.
    pub fn new(
        gate: Gate,
        store: Arc<dyn ReferenceStore>,
        opendata: CachedOpenDataClient,
        navitia: CachedNavitiaClient,
    ) -> Self {
        Self {
            gate,
            store,
            opendata: Arc::new(opendata),
            navitia: Arc::new(navitia),
        }
    }
}
