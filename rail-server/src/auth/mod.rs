//! Bearer token authentication.
//!
//! Tokens are JWTs issued by an external identity provider. The provider
//! publishes its public keys as a JWKS document; [`KeyCache`] keeps a copy
//! of them and [`TokenValidator`] checks tokens against it.

mod error;
mod keys;
mod token;

pub use error::{AuthError, KeyError};
pub use keys::{JwksSource, KeyCache, KeySource, SigningKey, parse_key_set};
pub use token::{TokenClaims, TokenValidator, ValidatorConfig};

#[cfg(test)]
pub(crate) mod testing {
    //! Fixture keys and a scripted key source for unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::Value;

    use super::{KeyError, KeySource, SigningKey, parse_key_set};

    pub const PRIMARY_JWK: &str = include_str!("../../tests/fixtures/primary_jwk.json");
    pub const ROTATED_JWK: &str = include_str!("../../tests/fixtures/rotated_jwk.json");
    pub const PRIMARY_PEM: &str = include_str!("../../tests/fixtures/primary_private.pem");
    pub const ROTATED_PEM: &str = include_str!("../../tests/fixtures/rotated_private.pem");

    /// Wrap JWK documents into a key set.
    pub fn jwks(keys: &[&str]) -> String {
        format!(r#"{{"keys": [{}]}}"#, keys.join(","))
    }

    /// Sign claims with an RSA private key.
    pub fn mint(pem: &str, kid: Option<&str>, alg: Algorithm, claims: &Value) -> String {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    /// Key source that replays a fixed sequence of responses.
    pub struct ScriptedSource {
        script: Mutex<VecDeque<Result<String, KeyError>>>,
        fetches: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Result<String, KeyError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fetches: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        /// Make every fetch take this long.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<SigningKey>, KeyError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(body)) => parse_key_set(&body, Utc::now()),
                Some(Err(err)) => Err(err),
                None => Err(KeyError::Unavailable("script exhausted".to_string())),
            }
        }
    }
}
