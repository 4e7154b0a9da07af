//! Authentication error types.

/// Errors from the signing key cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// No key with this ID exists, even after a refresh
    #[error("no signing key with id {0}")]
    NotFound(String),

    /// The key set endpoint could not be reached or returned an error status
    #[error("key set unavailable: {0}")]
    Unavailable(String),

    /// The key set endpoint returned a document that is not a key set
    #[error("malformed key set: {0}")]
    Malformed(String),
}

/// Reasons a bearer token was refused.
///
/// Every variant becomes the same 401 response; the variant itself is only
/// used for logging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Missing header, bad structure, or undecodable claims
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// The token names a key that is not in the key set
    #[error("unknown signing key")]
    UnknownKey,

    /// Signature does not verify with the located key and configured algorithm
    #[error("bad signature")]
    BadSignature,

    /// `iss` is missing or differs from the configured issuer
    #[error("unexpected issuer")]
    BadIssuer,

    /// `aud` is missing or does not contain the configured audience
    #[error("unexpected audience")]
    BadAudience,

    /// `exp` is missing or in the past (beyond the skew tolerance)
    #[error("token expired")]
    Expired,

    /// No keys have ever been fetched and the key set is unreachable
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(#[source] KeyError),
}

impl AuthError {
    /// Short machine-readable reason for log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "malformed",
            AuthError::UnknownKey => "unknown_key",
            AuthError::BadSignature => "bad_signature",
            AuthError::BadIssuer => "bad_issuer",
            AuthError::BadAudience => "bad_audience",
            AuthError::Expired => "expired",
            AuthError::KeysUnavailable(_) => "keys_unavailable",
        }
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::NotFound(_) => AuthError::UnknownKey,
            other => AuthError::KeysUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_errors_map_to_auth_errors() {
        assert_eq!(
            AuthError::from(KeyError::NotFound("k1".into())),
            AuthError::UnknownKey
        );

        let err = AuthError::from(KeyError::Unavailable("connection refused".into()));
        assert_eq!(err.reason(), "keys_unavailable");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            AuthError::Malformed("missing bearer token").to_string(),
            "malformed token: missing bearer token"
        );
        assert_eq!(AuthError::Expired.to_string(), "token expired");
        assert_eq!(
            KeyError::NotFound("2024-rot".into()).to_string(),
            "no signing key with id 2024-rot"
        );
    }
}
