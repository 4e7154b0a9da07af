//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::get,
};
use chrono::{Local, NaiveDateTime};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::domain::{DEPARTEMENTS, REGIONS, UicCode};
use crate::upstream::{Disruption, StationQuery};

use super::dto::*;
use super::error::AppError;
use super::gate::{Gate, request_gate};
use super::state::AppState;

/// Create the application router.
///
/// Everything except `/health` sits behind the Request Gate.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/regions", get(list_regions))
        .route("/departements", get(list_departements))
        .route("/stations", get(list_stations))
        .route("/stations/:station_id", get(get_station))
        .route("/lines", get(list_lines))
        .route("/lines/:line_id", get(get_line))
        .route("/trains", get(list_trains))
        .route("/trains/:train_id", get(get_train))
        .route("/alerts/major", get(major_alerts));

    Router::new()
        .route("/health", get(health))
        .merge(protect(api, state.gate.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Put `routes` behind the Request Gate.
///
/// Panics are caught inside the gate so they are audited as 500s.
pub fn protect<S>(routes: Router<S>, gate: Gate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn_with_state(gate, request_gate))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Resolve an optional `limit` against its default and inclusive maximum.
fn bounded_limit(limit: Option<u32>, default: u32, max: u32) -> Result<u32, AppError> {
    match limit {
        None => Ok(default),
        Some(n) if (1..=max).contains(&n) => Ok(n),
        Some(n) => Err(AppError::BadRequest {
            message: format!("limit must be between 1 and {max}, got {n}"),
        }),
    }
}

async fn list_regions() -> Json<RegionList> {
    let regions: Vec<RegionDto> = REGIONS.iter().map(RegionDto::from).collect();
    Json(RegionList {
        total: regions.len(),
        regions,
    })
}

async fn list_departements() -> Json<DepartementList> {
    let departements: Vec<DepartementDto> = DEPARTEMENTS.iter().map(DepartementDto::from).collect();
    Json(DepartementList {
        total: departements.len(),
        departements,
    })
}

/// List or search stations from the SNCF station dataset.
async fn list_stations(
    State(state): State<AppState>,
    Query(req): Query<StationsQuery>,
) -> Result<Json<StationList>, AppError> {
    let query = StationQuery {
        limit: bounded_limit(req.limit, 100, 500)?,
        offset: req.offset.unwrap_or(0),
        search: req
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    };

    let page = state.opendata.stations(&query).await?;

    Ok(Json(StationList {
        stations: page.stations.iter().map(Station::from_record).collect(),
        total: page.total,
    }))
}

/// Station detail by UIC code.
async fn get_station(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> Result<Json<StationDetail>, AppError> {
    let uic = UicCode::parse(&station_id)?;

    let station = state.opendata.station(&uic).await?;
    match &*station {
        Some(record) => Ok(Json(StationDetail::from_record(record))),
        None => Err(AppError::not_found(format!("Station {uic} not found"))),
    }
}

/// Active lines, optionally filtered by transport mode.
async fn list_lines(
    State(state): State<AppState>,
    Query(req): Query<LinesQuery>,
) -> Result<Json<LineList>, AppError> {
    let limit = bounded_limit(req.limit, 100, 500)?;
    let records = state.store.active_lines(limit).await?;

    let lines: Vec<Line> = records
        .iter()
        .map(Line::from)
        .filter(|line| req.transport_mode.is_none_or(|mode| line.transport_mode == mode))
        .collect();

    Ok(Json(LineList {
        total: lines.len(),
        lines,
    }))
}

/// Line detail, with stop names from Navitia when it answers.
async fn get_line(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Result<Json<LineDetail>, AppError> {
    let record = state
        .store
        .line(&line_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Line {line_id} not found")))?;

    let stations = match state.navitia.line_routes(&line_id).await {
        Ok(routes) => routes
            .into_iter()
            .next()
            .map(|route| {
                route
                    .stop_points
                    .into_iter()
                    .filter_map(|sp| sp.name.filter(|n| !n.is_empty()))
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!(line_id = %line_id, error = %e, "line routes unavailable");
            Vec::new()
        }
    };

    Ok(Json(LineDetail {
        line: Line::from(&record),
        stations,
    }))
}

/// Real-time departures for a station, or active trains from the database.
async fn list_trains(
    State(state): State<AppState>,
    Query(req): Query<TrainsQuery>,
) -> Result<Json<TrainList>, AppError> {
    let limit = bounded_limit(req.limit, 50, 200)?;

    if let Some(station_id) = req.station_id.as_deref().filter(|s| !s.is_empty()) {
        let departures = state.navitia.departures(station_id, limit).await?;
        let trains: Vec<Train> = departures
            .iter()
            .map(|d| Train::from_departure(d, station_id))
            .collect();

        return Ok(Json(TrainList {
            total: trains.len() as i64,
            trains,
        }));
    }

    let page = state
        .store
        .active_trains(req.status.as_deref(), limit)
        .await?;

    Ok(Json(TrainList {
        trains: page.trains.iter().map(Train::from).collect(),
        total: page.total,
    }))
}

/// Train detail by numeric id or by train number.
async fn get_train(
    State(state): State<AppState>,
    Path(train_id): Path<String>,
) -> Result<Json<TrainDetail>, AppError> {
    let record = match train_id.parse::<i32>() {
        Ok(id) => state.store.train_by_id(id).await?,
        Err(_) => state.store.train_by_number(&train_id).await?,
    };

    record
        .map(|r| Json(TrainDetail::from(&r)))
        .ok_or_else(|| AppError::not_found(format!("Train {train_id} not found")))
}

/// Major disruptions on the network.
async fn major_alerts(
    State(state): State<AppState>,
    Query(req): Query<AlertsQuery>,
) -> Result<Json<AlertList>, AppError> {
    let disruptions = state.navitia.disruptions().await?;
    let alerts = build_alerts(&disruptions, &req, Local::now().naive_local());

    Ok(Json(AlertList {
        total: alerts.len(),
        alerts,
    }))
}

/// Classify and filter disruptions as seen at `now`.
fn build_alerts(disruptions: &[Disruption], req: &AlertsQuery, now: NaiveDateTime) -> Vec<Alert> {
    let active_only = req.active_only.unwrap_or(true);

    disruptions
        .iter()
        .enumerate()
        .map(|(index, d)| Alert::from_disruption(index, d, now))
        .filter(|alert| req.severity.is_none_or(|s| alert.severity == s))
        .filter(|alert| !active_only || alert.is_active)
        .collect()
}
