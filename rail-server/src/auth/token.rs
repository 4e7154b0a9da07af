//! Bearer token validation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::AuthError;
use super::keys::KeyCache;

/// Settings for validating tokens.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Exact value `iss` must carry
    pub issuer: String,
    /// Value `aud` must be or contain
    pub audience: String,
    /// The only accepted signature algorithm
    pub algorithm: Algorithm,
    /// Tolerance applied to `exp`
    pub clock_skew: Duration,
}

/// The verified identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Stable subject identifier (`sub`)
    pub subject: String,
    pub issuer: String,
    pub audience: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    /// Space-separated `scope` claim, split
    pub scopes: Vec<String>,
}

impl TokenClaims {
    /// Check whether the token was granted a scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            Audience::One(aud) => BTreeSet::from([aud]),
            Audience::Many(auds) => auds.into_iter().collect(),
        }
    }
}

/// Registered claims we look at. Anything else in the payload is ignored.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<Audience>,
    exp: Option<f64>,
    iat: Option<f64>,
    scope: Option<String>,
}

/// Validates bearer tokens against a key cache and fixed expectations.
///
/// Checks run in a fixed order and stop at the first failure: structure,
/// key lookup, signature, issuer, audience, expiry.
#[derive(Debug)]
pub struct TokenValidator {
    keys: Arc<KeyCache>,
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    clock_skew: Duration,
}

impl TokenValidator {
    pub fn new(config: &ValidatorConfig, keys: Arc<KeyCache>) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            algorithm: config.algorithm,
            clock_skew: config.clock_skew,
        }
    }

    /// Validate a token against the current time.
    pub async fn validate(&self, raw: &str) -> Result<TokenClaims, AuthError> {
        self.validate_at(raw, Utc::now()).await
    }

    /// Validate a token as of `now`.
    pub async fn validate_at(&self, raw: &str, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        let header = split_structure(raw)?;

        let kid = header
            .get("kid")
            .and_then(Value::as_str)
            .ok_or(AuthError::UnknownKey)?;

        let key = self.keys.get_key(kid).await?;

        // The algorithm always comes from configuration, never from the token
        if key.algorithm.is_some_and(|alg| alg != self.algorithm) {
            return Err(AuthError::BadSignature);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let payload = decode::<Map<String, Value>>(raw, &key.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AuthError::Malformed("undecodable token"),
                _ => AuthError::BadSignature,
            })?
            .claims;

        let claims: RawClaims = serde_json::from_value(Value::Object(payload))
            .map_err(|_| AuthError::Malformed("claims have unexpected types"))?;

        self.check_claims(claims, now)
    }

    fn check_claims(&self, claims: RawClaims, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        let issuer = claims.iss.ok_or(AuthError::BadIssuer)?;
        if issuer != self.issuer {
            return Err(AuthError::BadIssuer);
        }

        let audience = claims.aud.ok_or(AuthError::BadAudience)?.into_set();
        if !audience.contains(&self.audience) {
            return Err(AuthError::BadAudience);
        }

        let exp = claims.exp.ok_or(AuthError::Expired)?;
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        if now_secs >= exp + self.clock_skew.as_secs_f64() {
            return Err(AuthError::Expired);
        }

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::Malformed("missing subject"))?;

        let expires_at = numeric_date(exp).ok_or(AuthError::Malformed("exp out of range"))?;
        let issued_at = claims.iat.and_then(numeric_date);

        let scopes = claims
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(TokenClaims {
            subject,
            issuer,
            audience,
            expires_at,
            issued_at,
            scopes,
        })
    }
}

/// Check the three-segment shape and return the decoded header.
fn split_structure(raw: &str) -> Result<Map<String, Value>, AuthError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::Malformed("expected three segments"));
    }

    let header = decode_json_segment(segments[0])?;
    decode_json_segment(segments[1])?;
    URL_SAFE_NO_PAD
        .decode(segments[2])
        .map_err(|_| AuthError::Malformed("signature is not base64url"))?;

    Ok(header)
}

fn decode_json_segment(segment: &str) -> Result<Map<String, Value>, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed("segment is not base64url"))?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(AuthError::Malformed("segment is not a JSON object")),
    }
}

fn numeric_date(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs.floor() as i64, 0)
}
