//! Downstream endpoints with mocked upstream providers.

mod common;

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rail_server::store::{LineRecord, MemoryReferenceStore, TrainRecord};

use common::*;

const RECORDS_PATH: &str = "/catalog/datasets/liste-des-gares/records";

fn line(code: &str, name: &str, network: &str) -> LineRecord {
    LineRecord {
        line_code: code.to_string(),
        name: name.to_string(),
        network: Some(network.to_string()),
        color: None,
        text_color: None,
        is_active: true,
    }
}

fn train(id: i32, number: &str, hour: u32, status: &str) -> TrainRecord {
    TrainRecord {
        id,
        train_number: number.to_string(),
        line_code: Some("FR:TGV-1".to_string()),
        origin: Some("Paris Gare de Lyon".to_string()),
        destination: Some("Lyon Part-Dieu".to_string()),
        departure_time: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0),
        arrival_time: None,
        status: Some(status.to_string()),
        delay_minutes: if status == "delayed" { 12 } else { 0 },
        is_active: true,
    }
}

fn reference_data() -> MemoryReferenceStore {
    MemoryReferenceStore::new(
        vec![
            line("FR:TGV-1", "TGV Paris - Lyon", "TGV INOUI"),
            line("FR:TER-K12", "K12 Lille - Amiens", "TER Hauts-de-France"),
            line("FR:IC-1", "Paris - Clermont", "INTERCITES"),
        ],
        vec![
            train(1, "TGV6601", 8, "scheduled"),
            train(2, "TER84512", 9, "delayed"),
            train(3, "TGV6605", 10, "delayed"),
        ],
    )
}

async fn app_with(upstream: &MockServer, store: MemoryReferenceStore) -> (TestApp, MockServer) {
    let jwks = jwks_server().await;
    let app = TestApp::start(
        AppOptions::new(format!("{}/jwks", jwks.uri()))
            .upstream(upstream.uri())
            .store(store),
    );
    (app, jwks)
}

#[tokio::test]
async fn lists_stations() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORDS_PATH))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 2874,
            "results": [
                {"libelle": "Lyon Part-Dieu", "code_uic": "87723197", "voyageurs": "O", "fret": "N",
                 "coordonnees_geographiques": {"lat": 45.76, "lon": 4.86}},
                {"libelle": "Dijon", "code_uic": "87713040", "voyageurs": "O", "fret": "N"}
            ]
        })))
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::default()).await;

    let response = app.get("/stations?limit=2", Some(&token_for("alice"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["total"], 2874);
    assert_eq!(body["stations"][0]["id"], "87723197");
    assert_eq!(body["stations"][0]["coordinates"]["latitude"], 45.76);
    assert_eq!(body["stations"][1]["name"], "Dijon");
}

#[tokio::test]
async fn station_limit_is_validated() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::default()).await;

    let response = app.get("/stations?limit=501", Some(&token_for("alice"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn station_detail_and_not_found() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORDS_PATH))
        .and(query_param("where", "code_uic = '87723197'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "results": [{"libelle": "Lyon Part-Dieu", "code_uic": "87723197",
                         "voyageurs": "O", "fret": "O", "adresse_cp": "69003"}]
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(RECORDS_PATH))
        .and(query_param("where", "code_uic = '87000000'"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "results": []})),
        )
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::default()).await;
    let token = token_for("alice");

    let response = app.get("/stations/87723197", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["address"], "69003");
    assert_eq!(body["services"], json!(["Voyageurs", "Fret"]));

    let response = app.get("/stations/87000000", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/stations/lyon", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_failure_is_503() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::default()).await;
    let token = token_for("alice");

    let response = app.get("/stations", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(json_body(response).await["detail"].is_string());

    let response = app.get("/alerts/major", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let records = app.audit_records().await;
    assert!(records.iter().all(|r| r.status == 503));
}

#[tokio::test]
async fn lists_lines_by_mode() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;
    let token = token_for("alice");

    let body = json_body(app.get("/lines", Some(&token)).await).await;
    assert_eq!(body["total"], 3);

    let body = json_body(app.get("/lines?transport_mode=intercites", Some(&token)).await).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["lines"][0]["id"], "FR:IC-1");
    assert_eq!(body["lines"][0]["operator"], "INTERCITES");
}

#[tokio::test]
async fn line_detail_tolerates_navitia_outage() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage/sncf/lines/FR:TGV-1/routes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;
    let token = token_for("alice");

    let response = app.get("/lines/FR:TGV-1", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["transport_mode"], "tgv");
    assert_eq!(body["stations"], json!([]));

    let response = app.get("/lines/FR:NOPE", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn line_detail_lists_route_stops() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage/sncf/lines/FR:TGV-1/routes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "routes": [{
                "id": "route:1",
                "stop_points": [{"name": "Paris Gare de Lyon"}, {"name": ""}, {"name": "Lyon Part-Dieu"}]
            }]
        })))
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;

    let body = json_body(app.get("/lines/FR:TGV-1", Some(&token_for("alice"))).await).await;
    assert_eq!(body["stations"], json!(["Paris Gare de Lyon", "Lyon Part-Dieu"]));
}

#[tokio::test]
async fn lists_trains_from_the_database() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;
    let token = token_for("alice");

    let body = json_body(app.get("/trains?status=delayed&limit=1", Some(&token)).await).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["trains"].as_array().unwrap().len(), 1);
    assert_eq!(body["trains"][0]["number"], "TGV6605");
    assert_eq!(body["trains"][0]["transport_mode"], "tgv");
    assert_eq!(body["trains"][0]["departure_time"], "2024-06-01T10:00:00");
}

#[tokio::test]
async fn train_detail_by_id_or_number() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;
    let token = token_for("alice");

    let body = json_body(app.get("/trains/2", Some(&token)).await).await;
    assert_eq!(body["number"], "TER84512");
    assert_eq!(body["current_delay_minutes"], 12);

    let body = json_body(app.get("/trains/TGV6601", Some(&token)).await).await;
    assert_eq!(body["id"], "1");

    let response = app.get("/trains/99", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn database_outage_is_503() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::unavailable()).await;

    let response = app.get("/trains", Some(&token_for("alice"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn station_departures_come_from_navitia() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage/sncf/stop_areas/stop_area:SNCF:87723197/departures"))
        .and(query_param("count", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "departures": [
                {
                    "stop_point": {"name": "Lyon Part-Dieu"},
                    "route": {"id": "route:1", "name": "Lyon - Marseille",
                              "direction": {"name": "Marseille Saint-Charles"}},
                    "stop_date_time": {"departure_date_time": "20240601T101000",
                                       "base_departure_date_time": "20240601T100000"}
                },
                {
                    "route": {"id": "route:2", "name": "Lyon - Grenoble"},
                    "stop_date_time": {"departure_date_time": "20240601T103000",
                                       "base_departure_date_time": "20240601T103000"}
                }
            ]
        })))
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;

    let body = json_body(
        app.get(
            "/trains?station_id=stop_area:SNCF:87723197&limit=10",
            Some(&token_for("alice")),
        )
        .await,
    )
    .await;

    assert_eq!(body["total"], 2);
    assert_eq!(body["trains"][0]["status"], "delayed");
    assert_eq!(body["trains"][1]["status"], "scheduled");
    assert_eq!(body["trains"][1]["departure_station"], "stop_area:SNCF:87723197");
}

#[tokio::test]
async fn major_alerts_are_classified() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage/sncf/disruptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "disruptions": [
                {
                    "id": "d1",
                    "cause": "Incident technique",
                    "severity": {"effect": "NO_SERVICE"},
                    "application_periods": [{"begin": "20240101T000000", "end": "20991231T235959"}],
                    "impacted_objects": [
                        {"pt_object": {"embedded_type": "line", "line": {"name": "TER Lyon - Grenoble"}}}
                    ]
                },
                {
                    "id": "d2",
                    "severity": {"effect": "SIGNIFICANT_DELAYS"},
                    "application_periods": [{"begin": "20200101T000000", "end": "20200102T000000"}]
                }
            ]
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    let (app, _jwks) = app_with(&upstream, reference_data()).await;
    let token = token_for("alice");

    let body = json_body(app.get("/alerts/major", Some(&token)).await).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["alerts"][0]["severity"], "critical");
    assert_eq!(body["alerts"][0]["affected_lines"], json!(["TER Lyon - Grenoble"]));

    // Served from cache: the mock expects a single upstream call
    let body = json_body(
        app.get("/alerts/major?active_only=false&severity=major", Some(&token))
            .await,
    )
    .await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["alerts"][0]["id"], "d2");
    assert_eq!(body["alerts"][0]["is_active"], false);
}

#[tokio::test]
async fn static_tables() {
    let upstream = MockServer::start().await;
    let (app, _jwks) = app_with(&upstream, MemoryReferenceStore::default()).await;
    let token = token_for("alice");

    let body = json_body(app.get("/departements", Some(&token)).await).await;
    assert_eq!(body["total"], 96);
    let paris = body["departements"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["code"] == "75")
        .unwrap();
    assert_eq!(paris["region_name"], "Île-de-France");
}
