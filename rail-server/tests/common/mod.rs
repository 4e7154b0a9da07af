//! Shared helpers for integration tests.
//!
//! Tokens are signed with the fixture RSA keys and checked against a
//! wiremock server publishing the matching JWKS. Postgres is replaced by the
//! in-memory audit sink and reference store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rail_server::audit::{AuditConfig, AuditLogger, AuditRecord, MemoryAuditSink};
use rail_server::auth::{JwksSource, KeyCache, TokenValidator, ValidatorConfig};
use rail_server::limit::{RateLimitConfig, RateLimiter};
use rail_server::store::MemoryReferenceStore;
use rail_server::upstream::{
    CacheConfig, CachedNavitiaClient, CachedOpenDataClient, NavitiaClient, NavitiaConfig,
    OpenDataClient, OpenDataConfig,
};
use rail_server::web::{AppState, Gate, create_router};

pub const PRIMARY_JWK: &str = include_str!("../fixtures/primary_jwk.json");
pub const PRIMARY_PEM: &str = include_str!("../fixtures/primary_private.pem");
pub const ROTATED_PEM: &str = include_str!("../fixtures/rotated_private.pem");

pub const ISSUER: &str = "https://auth.example.com/realms/rail";
pub const AUDIENCE: &str = "rail-api";

/// Start a server publishing the primary key at `/jwks`.
pub async fn jwks_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!(r#"{{"keys": [{PRIMARY_JWK}]}}"#), "application/json"),
        )
        .mount(&server)
        .await;
    server
}

/// Claims accepted by the test validator for `subject`.
pub fn claims_for(subject: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": subject,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Sign claims with an RSA private key under key id `kid`.
pub fn mint(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// A valid token for `subject`.
pub fn token_for(subject: &str) -> String {
    mint(PRIMARY_PEM, "primary", &claims_for(subject))
}

/// Knobs for [`TestApp::start`].
pub struct AppOptions {
    pub jwks_url: String,
    /// Base URL for both the open-data and Navitia clients
    pub upstream_url: String,
    pub rate_limit: RateLimitConfig,
    pub sink: MemoryAuditSink,
    pub store: MemoryReferenceStore,
}

impl AppOptions {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            // Nothing listens on the discard port
            upstream_url: "http://127.0.0.1:9".to_string(),
            rate_limit: RateLimitConfig::default(),
            sink: MemoryAuditSink::new(),
            store: MemoryReferenceStore::default(),
        }
    }

    pub fn upstream(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    pub fn rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = RateLimitConfig::new(limit, window);
        self
    }

    pub fn sink(mut self, sink: MemoryAuditSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(mut self, store: MemoryReferenceStore) -> Self {
        self.store = store;
        self
    }
}

/// The full application wired to in-memory fakes.
pub struct TestApp {
    pub state: AppState,
    pub sink: Arc<MemoryAuditSink>,
}

impl TestApp {
    pub fn start(options: AppOptions) -> Self {
        let config = ValidatorConfig {
            issuer: ISSUER.to_string(),
            audience: AUDIENCE.to_string(),
            algorithm: Algorithm::RS256,
            clock_skew: Duration::ZERO,
        };
        let source = JwksSource::new(options.jwks_url, Duration::from_secs(2)).unwrap();
        let keys = Arc::new(KeyCache::new(Arc::new(source)));
        let validator = Arc::new(TokenValidator::new(&config, keys));
        let limiter = Arc::new(RateLimiter::new(options.rate_limit));

        let sink = Arc::new(options.sink);
        let audit = AuditLogger::spawn(sink.clone(), &AuditConfig::default());

        let opendata = OpenDataClient::new(
            OpenDataConfig::new()
                .with_base_url(options.upstream_url.clone())
                .with_timeout(2),
        )
        .unwrap();
        let navitia = NavitiaClient::new(
            NavitiaConfig::new()
                .with_base_url(options.upstream_url)
                .with_timeout(2),
        )
        .unwrap();
        let cache = CacheConfig::default();

        let state = AppState::new(
            Gate::new(validator, limiter, audit),
            Arc::new(options.store),
            CachedOpenDataClient::new(opendata, &cache),
            CachedNavitiaClient::new(navitia, &cache),
        );

        Self { state, sink }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Send a GET, optionally with a bearer token, through the full router.
    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        send(self.router(), uri, token).await
    }

    /// Audit records written so far, after draining the queue.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.gate.audit().flush().await;
        self.sink.records().await
    }
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(router: Router, uri: &str, token: Option<&str>) -> Response<Body> {
    router.oneshot(get_request(uri, token)).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
