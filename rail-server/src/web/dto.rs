//! Data transfer objects for web requests and responses.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{AlertSeverity, Departement, Region, TransportMode};
use crate::store::{LineRecord, TrainRecord};
use crate::upstream::{Departure, Disruption, StationRecord};

/// Most affected lines or stations listed on one alert.
const MAX_AFFECTED: usize = 10;

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

// ===== Query parameters =====

/// Query for `GET /stations`.
#[derive(Debug, Default, Deserialize)]
pub struct StationsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Substring of the station name
    pub search: Option<String>,
}

/// Query for `GET /lines`.
#[derive(Debug, Default, Deserialize)]
pub struct LinesQuery {
    pub limit: Option<u32>,
    pub transport_mode: Option<TransportMode>,
}

/// Query for `GET /trains`.
#[derive(Debug, Default, Deserialize)]
pub struct TrainsQuery {
    pub limit: Option<u32>,
    /// Navitia stop area; switches to real-time departures
    pub station_id: Option<String>,
    pub status: Option<String>,
}

/// Query for `GET /alerts/major`.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub active_only: Option<bool>,
    pub severity: Option<AlertSeverity>,
}

// ===== Regions & departements =====

#[derive(Debug, Serialize)]
pub struct RegionDto {
    pub id: String,
    pub name: String,
    pub code: String,
}

impl From<&Region> for RegionDto {
    fn from(r: &Region) -> Self {
        Self {
            id: r.code.to_string(),
            name: r.name.to_string(),
            code: r.code.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegionList {
    pub regions: Vec<RegionDto>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DepartementDto {
    pub id: String,
    pub name: String,
    pub code: String,
    pub region_id: Option<String>,
    pub region_name: Option<String>,
}

impl From<&Departement> for DepartementDto {
    fn from(d: &Departement) -> Self {
        let region = d.region();
        Self {
            id: d.code.to_string(),
            name: d.name.to_string(),
            code: d.code.to_string(),
            region_id: region.map(|r| r.code.to_string()),
            region_name: region.map(|r| r.name.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepartementList {
    pub departements: Vec<DepartementDto>,
    pub total: usize,
}

// ===== Stations =====

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A station in a listing.
#[derive(Debug, Serialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub uic_code: Option<String>,
    pub departement: Option<String>,
    pub commune: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub is_active: bool,
}

impl Station {
    pub fn from_record(record: &StationRecord) -> Self {
        // A missing flag counts as open
        let open = |flag: &Option<String>| flag.as_deref().unwrap_or("O") == "O";

        Self {
            id: record.code_uic.clone().unwrap_or_default(),
            name: record
                .libelle
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            uic_code: record.code_uic.clone(),
            departement: record.departement_libellemin.clone(),
            commune: record.commune.clone(),
            coordinates: record.coordonnees_geographiques.map(|p| Coordinates {
                latitude: p.lat,
                longitude: p.lon,
            }),
            is_active: open(&record.voyageurs) || open(&record.fret),
        }
    }
}

/// Full station information.
#[derive(Debug, Serialize)]
pub struct StationDetail {
    #[serde(flatten)]
    pub station: Station,
    /// Postcode
    pub address: Option<String>,
    /// Not published by the dataset
    pub accessibility: Option<bool>,
    /// `Voyageurs` and/or `Fret`
    pub services: Vec<String>,
}

impl StationDetail {
    pub fn from_record(record: &StationRecord) -> Self {
        let mut services = Vec::new();
        if record.serves_passengers() {
            services.push("Voyageurs".to_string());
        }
        if record.handles_freight() {
            services.push("Fret".to_string());
        }

        let mut station = Station::from_record(record);
        station.is_active = !services.is_empty();

        Self {
            station,
            address: record.adresse_cp.clone(),
            accessibility: None,
            services,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StationList {
    pub stations: Vec<Station>,
    pub total: u64,
}

// ===== Lines =====

#[derive(Debug, Serialize)]
pub struct Line {
    pub id: String,
    pub name: String,
    pub code: String,
    pub transport_mode: TransportMode,
    pub operator: String,
    pub color: Option<String>,
}

impl From<&LineRecord> for Line {
    fn from(record: &LineRecord) -> Self {
        Self {
            id: record.line_code.clone(),
            name: record.name.clone(),
            code: record.line_code.clone(),
            transport_mode: TransportMode::classify(record.network.as_deref(), &record.name),
            operator: record
                .network
                .clone()
                .unwrap_or_else(|| "SNCF".to_string()),
            color: record.color.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineDetail {
    #[serde(flatten)]
    pub line: Line,
    /// Stop names along the first route
    pub stations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LineList {
    pub lines: Vec<Line>,
    pub total: usize,
}

// ===== Trains =====

#[derive(Debug, Serialize)]
pub struct Train {
    pub id: String,
    pub number: String,
    pub line_id: Option<String>,
    pub transport_mode: TransportMode,
    pub departure_station: Option<String>,
    pub arrival_station: Option<String>,
    pub departure_time: Option<NaiveDateTime>,
    pub arrival_time: Option<NaiveDateTime>,
    /// `scheduled`, `delayed`, `cancelled`, ...
    pub status: String,
}

impl From<&TrainRecord> for Train {
    fn from(record: &TrainRecord) -> Self {
        Self {
            id: record.id.to_string(),
            number: record.train_number.clone(),
            line_id: record.line_code.clone(),
            transport_mode: TransportMode::from_train_number(&record.train_number),
            departure_station: record.origin.clone(),
            arrival_station: record.destination.clone(),
            departure_time: record.departure_time,
            arrival_time: record.arrival_time,
            status: record
                .status
                .clone()
                .unwrap_or_else(|| "scheduled".to_string()),
        }
    }
}

impl Train {
    /// A real-time departure from `station_id`.
    pub fn from_departure(departure: &Departure, station_id: &str) -> Self {
        let route = departure.route.as_ref();

        Self {
            id: route.and_then(|r| r.id.clone()).unwrap_or_default(),
            number: route.and_then(|r| r.name.clone()).unwrap_or_default(),
            line_id: route.and_then(|r| r.line.as_ref()).and_then(|l| l.id.clone()),
            transport_mode: TransportMode::Train,
            departure_station: Some(
                departure
                    .stop_point
                    .as_ref()
                    .and_then(|sp| sp.name.clone())
                    .unwrap_or_else(|| station_id.to_string()),
            ),
            arrival_station: route
                .and_then(|r| r.direction.as_ref())
                .and_then(|d| d.name.clone()),
            departure_time: departure.departure_time(),
            arrival_time: None,
            status: if departure.is_delayed() {
                "delayed"
            } else {
                "scheduled"
            }
            .to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrainDetail {
    #[serde(flatten)]
    pub train: Train,
    pub current_delay_minutes: i32,
}

impl From<&TrainRecord> for TrainDetail {
    fn from(record: &TrainRecord) -> Self {
        Self {
            train: Train::from(record),
            current_delay_minutes: record.delay_minutes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrainList {
    pub trains: Vec<Train>,
    pub total: i64,
}

// ===== Alerts =====

#[derive(Debug, Serialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub affected_lines: Vec<String>,
    pub affected_stations: Vec<String>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

impl Alert {
    /// Build an alert from the `index`-th disruption, as seen at `now`.
    ///
    /// Only the first application period is considered. Without an end the
    /// alert is active; without a begin it starts at `now`.
    pub fn from_disruption(index: usize, disruption: &Disruption, now: NaiveDateTime) -> Self {
        use crate::upstream::parse_datetime;

        let period = disruption.application_periods.first();
        let start_time = period
            .and_then(|p| p.begin.as_deref())
            .and_then(parse_datetime)
            .unwrap_or(now);
        let end_time = period
            .and_then(|p| p.end.as_deref())
            .and_then(parse_datetime);
        let is_active = end_time.is_none_or(|end| end > now);

        let mut affected_lines = Vec::new();
        let mut affected_stations = Vec::new();
        for impacted in &disruption.impacted_objects {
            let Some(object) = &impacted.pt_object else {
                continue;
            };
            match object.embedded_type.as_deref() {
                Some("line") => {
                    let name = object.line.as_ref().and_then(|l| l.name.as_deref());
                    push_unique(&mut affected_lines, name);
                }
                Some("stop_area") => {
                    let name = object.stop_area.as_ref().and_then(|s| s.name.as_deref());
                    push_unique(&mut affected_stations, name);
                }
                Some("stop_point") => {
                    let name = object.stop_point.as_ref().and_then(|s| s.name.as_deref());
                    push_unique(&mut affected_stations, name);
                }
                _ => {}
            }
        }

        Self {
            id: disruption
                .id
                .clone()
                .unwrap_or_else(|| format!("ALERT_{index}")),
            title: disruption
                .cause
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "Perturbation en cours".to_string()),
            description: disruption
                .description()
                .unwrap_or("Incident signalé sur le réseau")
                .to_string(),
            severity: AlertSeverity::from_effect(disruption.effect()),
            affected_lines,
            affected_stations,
            start_time,
            end_time,
            is_active,
            created_at: start_time,
            updated_at: disruption.updated_at.as_deref().and_then(parse_datetime),
        }
    }
}

/// Append a non-empty name not already present, up to [`MAX_AFFECTED`].
fn push_unique(names: &mut Vec<String>, name: Option<&str>) {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return;
    };
    if names.len() < MAX_AFFECTED && !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

#[derive(Debug, Serialize)]
pub struct AlertList {
    pub alerts: Vec<Alert>,
    pub total: usize,
}
