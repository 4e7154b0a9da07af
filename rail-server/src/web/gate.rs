//! Request Gate middleware.
//!
//! Every protected request passes through [`request_gate`]:
//!
//! 1. the bearer token is validated (401 on any failure),
//! 2. the verified subject is checked against the rate limiter (429),
//! 3. the handler runs with the [`TokenClaims`] in its extensions,
//! 4. exactly one audit record is queued with the final status.
//!
//! The audit record is written from a drop guard, so a request abandoned by
//! the client mid-handler is still recorded, with status 499.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::audit::{AuditLogger, AuditRecord};
use crate::auth::{TokenClaims, TokenValidator};
use crate::limit::{Decision, RateLimiter};

use super::dto::ErrorResponse;

/// Status recorded when the client goes away before a response exists.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Shared state for the gate.
#[derive(Clone)]
pub struct Gate {
    validator: Arc<TokenValidator>,
    limiter: Arc<RateLimiter>,
    audit: AuditLogger,
}

impl Gate {
    pub fn new(validator: Arc<TokenValidator>, limiter: Arc<RateLimiter>, audit: AuditLogger) -> Self {
        Self {
            validator,
            limiter,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}

/// Records the request when dropped.
struct AuditGuard {
    audit: AuditLogger,
    method: String,
    path: String,
    subject: Option<String>,
    status: Option<u16>,
    started: Instant,
}

impl AuditGuard {
    fn new(audit: AuditLogger, request: &Request) -> Self {
        Self {
            audit,
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            subject: None,
            status: None,
            started: Instant::now(),
        }
    }

    fn finish(mut self, response: Response) -> Response {
        self.status = Some(response.status().as_u16());
        response
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        let status = self.status.unwrap_or(CLIENT_CLOSED_REQUEST);
        if self.status.is_none() {
            debug!(method = %self.method, path = %self.path, "request abandoned before completion");
        }

        self.audit.record(AuditRecord {
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            subject: self.subject.take(),
            status,
            duration: self.started.elapsed(),
            recorded_at: Utc::now(),
        });
    }
}

/// Authenticate, rate limit, run and audit one request.
pub async fn request_gate(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let mut guard = AuditGuard::new(gate.audit.clone(), &request);

    let Some(token) = bearer_token(request.headers()) else {
        warn!(path = %guard.path, reason = "malformed", "missing or malformed Authorization header");
        return guard.finish(unauthorized_response());
    };

    let claims: TokenClaims = match gate.validator.validate(&token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(path = %guard.path, reason = e.reason(), error = %e, "token rejected");
            return guard.finish(unauthorized_response());
        }
    };
    guard.subject = Some(claims.subject.clone());

    if let Decision::Rejected { retry_after } = gate.limiter.admit(&claims.subject) {
        let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        warn!(
            subject = %claims.subject,
            path = %guard.path,
            retry_after_secs,
            "rate limit exceeded"
        );
        return guard.finish(rate_limited_response(retry_after_secs.max(1)));
    }

    debug!(subject = %claims.subject, path = %guard.path, "authenticated request");
    request.extensions_mut().insert(claims);

    let response = next.run(request).await;
    guard.finish(response)
}

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Create a 401 Unauthorized response. The cause is never disclosed.
fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
        Json(ErrorResponse::new("Invalid authorization token")),
    )
        .into_response()
}

/// Create a 429 Too Many Requests response.
fn rate_limited_response(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
        Json(ErrorResponse::new("Rate limit exceeded")),
    )
        .into_response()
}
